use crate::dose::{DoseGeometry, DoseGrid};
use crate::error::{DvhcatError, Result};
use crate::types::{DoseSummationType, PixelSpacing, Point3};
use dicom_core::value::PrimitiveValue;
use dicom_dictionary_std::uids::{EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN};
use dicom_object::{open_file, InMemDicomObject, OpenFileOptions};
use log::debug;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::tags::*;

const IDENTITY_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
const PIXEL_DATA_TAG_BYTES: [u8; 4] = [0xE0, 0x7F, 0x10, 0x00];

/// Where the stored values of a dose live
#[derive(Debug, Clone, PartialEq)]
pub enum PixelSource {
    /// Uncompressed little-endian values starting at a byte offset of the file
    Native {
        path: PathBuf,
        offset: u64,
        bytes_per_value: usize,
    },
    /// Decoded through the DICOM reader when first needed
    Object { path: PathBuf, bits_allocated: u16 },
    /// Values already in memory
    Decoded(Arc<[u32]>),
}

/// RT Dose content: header plus the location of its pixel data
///
/// Loading a dose reads the header only. Stored values are read frame by
/// frame through [`DoseRecord::open_frames`], so the cost of a dose is
/// decided by how it is summed, not by how it is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseRecord {
    pub file_path: PathBuf,
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub patient_id: String,
    pub referenced_plan_uid: Option<String>,
    pub summation_type: Option<DoseSummationType>,
    pub dose_units: Option<String>,
    pub heterogeneity_correction: Option<String>,
    pub time_stamp: Option<String>,
    pub software_version: Option<String>,
    pub geometry: DoseGeometry,
    /// DoseGridScaling, Gy per stored unit
    pub scaling: f64,
    pub pixels: PixelSource,
}

impl DoseRecord {
    /// Creates a dose record from a DICOM file path, reading up to PixelData
    ///
    /// Native little-endian pixel data is located in the file and left there;
    /// any other encoding is decoded by the DICOM reader when frames are read.
    pub fn from_file(path: PathBuf) -> Result<Self> {
        let dcm = OpenFileOptions::new()
            .read_until(PIXEL_DATA)
            .open_file(&path)
            .map_err(|e| DvhcatError::Parse(format!("{}: {}", path.display(), e)))?;
        let bits_allocated = get_u16_value(&dcm, BITS_ALLOCATED).unwrap_or(32);
        let transfer_syntax = dcm.meta().transfer_syntax().trim_end_matches('\0').to_string();

        let mut record = Self::from_header(path, &dcm)?;
        record.pixels = match locate_native_pixels(
            &record.file_path,
            &transfer_syntax,
            bits_allocated,
            record.geometry.voxel_count(),
        )? {
            Some((offset, bytes_per_value)) => PixelSource::Native {
                path: record.file_path.clone(),
                offset,
                bytes_per_value,
            },
            None => {
                debug!(
                    "{}: pixel data is not native little-endian ({}), decoding on demand",
                    record.file_path.display(),
                    transfer_syntax
                );
                PixelSource::Object {
                    path: record.file_path.clone(),
                    bits_allocated,
                }
            }
        };
        Ok(record)
    }

    /// Creates a dose record from an already-opened DICOM object
    ///
    /// The object is in memory already, so its pixels are decoded right away.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for missing identifiers, inconsistent geometry or
    /// pixel data whose size disagrees with Rows × Columns × NumberOfFrames
    pub fn from_dicom(path: PathBuf, dcm: &InMemDicomObject) -> Result<Self> {
        let bits_allocated = get_u16_value(dcm, BITS_ALLOCATED).unwrap_or(32);
        let mut record = Self::from_header(path, dcm)?;
        let pixels = decode_pixels(dcm, bits_allocated)?;
        check_pixel_count(&record.file_path, pixels.len(), &record.geometry)?;
        record.pixels = PixelSource::Decoded(Arc::from(pixels));
        Ok(record)
    }

    /// Header fields only; `pixels` starts out empty
    fn from_header(path: PathBuf, dcm: &InMemDicomObject) -> Result<Self> {
        let missing = |name: &str| DvhcatError::Parse(format!("{}: missing {}", path.display(), name));

        let sop_instance_uid =
            get_string_value(dcm, SOP_INSTANCE_UID).ok_or_else(|| missing("SOPInstanceUID"))?;
        let study_instance_uid =
            get_string_value(dcm, STUDY_INSTANCE_UID).ok_or_else(|| missing("StudyInstanceUID"))?;
        let patient_id = get_string_value(dcm, PATIENT_ID).ok_or_else(|| missing("PatientID"))?;

        let geometry = extract_geometry(dcm).map_err(|e| {
            DvhcatError::Parse(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self {
            sop_instance_uid,
            study_instance_uid,
            patient_id,
            referenced_plan_uid: first_item(dcm, REFERENCED_RT_PLAN_SEQUENCE)
                .and_then(|item| get_string_value(item, REFERENCED_SOP_INSTANCE_UID)),
            summation_type: get_string_value(dcm, DOSE_SUMMATION_TYPE)
                .map(|s| DoseSummationType::from_str(&s)),
            dose_units: get_string_value(dcm, DOSE_UNITS),
            heterogeneity_correction: get_string_value(dcm, TISSUE_HETEROGENEITY_CORRECTION)
                .map(|s| s.replace('\\', ",")),
            time_stamp: get_date_time(dcm, INSTANCE_CREATION_DATE, INSTANCE_CREATION_TIME),
            software_version: get_string_value(dcm, SOFTWARE_VERSIONS),
            geometry,
            scaling: get_float_value(dcm, DOSE_GRID_SCALING).unwrap_or(1.0),
            pixels: PixelSource::Decoded(Arc::from(Vec::new())),
            file_path: path,
        })
    }

    /// Opens a reader over the stored (unscaled) values
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be opened, or `Parse` when decoded
    /// pixel data disagrees with the geometry
    pub fn open_frames(&self) -> Result<FrameReader> {
        let source = match &self.pixels {
            PixelSource::Native {
                path,
                offset,
                bytes_per_value,
            } => FrameSource::File {
                file: File::open(path)?,
                offset: *offset,
                bytes_per_value: *bytes_per_value,
                bytes: Vec::new(),
            },
            PixelSource::Object { path, bits_allocated } => {
                let dcm = open_file(path)?;
                let pixels = decode_pixels(&dcm, *bits_allocated)?;
                check_pixel_count(path, pixels.len(), &self.geometry)?;
                FrameSource::Memory(Arc::from(pixels))
            }
            PixelSource::Decoded(pixels) => FrameSource::Memory(Arc::clone(pixels)),
        };
        Ok(FrameReader {
            frame_len: self.geometry.frame_len(),
            frames: self.geometry.frames,
            source,
        })
    }

    /// Materializes the full grid in Gy
    pub fn to_grid(&self) -> Result<DoseGrid> {
        let mut grid = DoseGrid::zeros(self.geometry.clone())?;
        let flat = grid
            .values
            .as_slice_mut()
            .ok_or_else(|| DvhcatError::InvalidValue("dose grid is not contiguous".to_string()))?;
        let frame_len = self.geometry.frame_len();
        let mut reader = self.open_frames()?;
        let mut stored = Vec::with_capacity(frame_len);
        for frame in 0..self.geometry.frames {
            reader.read_frames(frame, frame + 1, &mut stored)?;
            let out = &mut flat[frame * frame_len..(frame + 1) * frame_len];
            for (value, raw) in out.iter_mut().zip(&stored) {
                *value = *raw as f64 * self.scaling;
            }
        }
        Ok(grid)
    }

    /// Estimated size of the materialized grid in bytes
    pub fn materialized_bytes(&self) -> u64 {
        self.geometry.voxel_count() as u64 * std::mem::size_of::<f64>() as u64
    }
}

/// Sequential access to the stored values of one dose, a frame range at a time
#[derive(Debug)]
pub struct FrameReader {
    frame_len: usize,
    frames: usize,
    source: FrameSource,
}

#[derive(Debug)]
enum FrameSource {
    File {
        file: File,
        offset: u64,
        bytes_per_value: usize,
        bytes: Vec<u8>,
    },
    Memory(Arc<[u32]>),
}

impl FrameReader {
    /// Replaces `out` with the stored values of frames `[start, end)`
    pub fn read_frames(&mut self, start: usize, end: usize, out: &mut Vec<u32>) -> Result<()> {
        out.clear();
        let end = end.min(self.frames);
        if start >= end {
            return Ok(());
        }
        let (lo, hi) = (start * self.frame_len, end * self.frame_len);
        match &mut self.source {
            FrameSource::Memory(values) => out.extend_from_slice(&values[lo..hi]),
            FrameSource::File {
                file,
                offset,
                bytes_per_value,
                bytes,
            } => {
                let width = *bytes_per_value;
                file.seek(SeekFrom::Start(*offset + (lo * width) as u64))?;
                bytes.resize((hi - lo) * width, 0);
                file.read_exact(bytes)?;
                match width {
                    4 => out.extend(
                        bytes
                            .chunks_exact(4)
                            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    ),
                    _ => out.extend(bytes.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)),
                }
            }
        }
        Ok(())
    }
}

fn check_pixel_count(path: &Path, count: usize, geometry: &DoseGeometry) -> Result<()> {
    if count != geometry.voxel_count() {
        return Err(DvhcatError::Parse(format!(
            "{}: pixel data holds {} values, expected {}",
            path.display(),
            count,
            geometry.voxel_count()
        )));
    }
    Ok(())
}

/// Finds native pixel data stored as the last element of the file
///
/// Returns the byte offset of the first value and the value width when the
/// element header in front of the expected value bytes is a PixelData
/// header of exactly that length; `None` for any other layout.
fn locate_native_pixels(
    path: &Path,
    transfer_syntax: &str,
    bits_allocated: u16,
    voxels: usize,
) -> Result<Option<(u64, usize)>> {
    let explicit = match transfer_syntax {
        EXPLICIT_VR_LITTLE_ENDIAN => true,
        IMPLICIT_VR_LITTLE_ENDIAN => false,
        _ => return Ok(None),
    };
    let width = match bits_allocated {
        16 => 2,
        32 => 4,
        _ => return Ok(None),
    };
    let expected = voxels as u64 * width as u64;
    let Ok(length) = u32::try_from(expected) else {
        return Ok(None);
    };
    let header_len: u64 = if explicit { 12 } else { 8 };
    let file_len = std::fs::metadata(path)?.len();
    if file_len < expected + header_len {
        return Ok(None);
    }

    let offset = file_len - expected;
    let mut header = vec![0u8; header_len as usize];
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset - header_len))?;
    file.read_exact(&mut header)?;

    let tag_matches = header[..4] == PIXEL_DATA_TAG_BYTES;
    let vr_matches = !explicit || &header[4..6] == b"OW" || &header[4..6] == b"OB";
    let tail = &header[header.len() - 4..];
    let length_matches = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) == length;
    Ok((tag_matches && vr_matches && length_matches).then_some((offset, width)))
}

fn extract_geometry(dcm: &InMemDicomObject) -> std::result::Result<DoseGeometry, String> {
    let rows = get_u16_value(dcm, ROWS).ok_or("missing Rows")? as usize;
    let columns = get_u16_value(dcm, COLUMNS).ok_or("missing Columns")? as usize;
    let frames = get_int_value(dcm, NUMBER_OF_FRAMES).unwrap_or(1).max(1) as usize;
    let spacing = get_multi_float_value(dcm, PIXEL_SPACING)
        .ok_or_else(|| "missing PixelSpacing".to_string())
        .and_then(|v| PixelSpacing::from_values(&v))?;
    let origin = get_multi_float_value(dcm, IMAGE_POSITION_PATIENT)
        .and_then(|v| Point3::from_slice(&v))
        .ok_or("missing ImagePositionPatient")?;

    let orientation = match get_multi_float_value(dcm, IMAGE_ORIENTATION_PATIENT) {
        Some(v) if v.len() >= 6 => [v[0], v[1], v[2], v[3], v[4], v[5]],
        Some(v) => return Err(format!("ImageOrientationPatient has {} values", v.len())),
        None => IDENTITY_ORIENTATION,
    };

    let frame_offsets = match get_multi_float_value(dcm, GRID_FRAME_OFFSET_VECTOR) {
        Some(offsets) => relative_offsets(offsets, origin.z),
        None if frames == 1 => vec![0.0],
        None => return Err("missing GridFrameOffsetVector".to_string()),
    };
    if frame_offsets.len() != frames {
        return Err(format!(
            "GridFrameOffsetVector has {} values for {} frames",
            frame_offsets.len(),
            frames
        ));
    }

    Ok(DoseGeometry {
        rows,
        columns,
        frames,
        spacing,
        origin,
        orientation,
        frame_offsets,
    })
}

/// Converts absolute frame offsets to offsets relative to the origin
///
/// Offsets are relative when the first one is zero; otherwise they are
/// treated as absolute z positions when the first matches the origin.
fn relative_offsets(offsets: Vec<f64>, origin_z: f64) -> Vec<f64> {
    let first = offsets.first().copied().unwrap_or(0.0);
    if first.abs() > 1e-6 && (first - origin_z).abs() < 1e-3 {
        offsets.iter().map(|z| z - origin_z).collect()
    } else {
        offsets
    }
}

/// Decodes stored dose values regardless of how the reader typed PixelData
fn decode_pixels(dcm: &InMemDicomObject, bits_allocated: u16) -> Result<Vec<u32>> {
    let elem = dcm
        .element(PIXEL_DATA)
        .map_err(|_| DvhcatError::Parse("missing PixelData".to_string()))?;
    let value = elem
        .value()
        .primitive()
        .ok_or_else(|| DvhcatError::Parse("encapsulated PixelData is not supported".to_string()))?;

    let pixels = match (value, bits_allocated) {
        (PrimitiveValue::U32(v), _) => v.iter().copied().collect(),
        (PrimitiveValue::I32(v), _) => v.iter().map(|x| (*x).max(0) as u32).collect(),
        (PrimitiveValue::U16(v), 32) => v
            .chunks_exact(2)
            .map(|pair| pair[0] as u32 | (pair[1] as u32) << 16)
            .collect(),
        (PrimitiveValue::U16(v), _) => v.iter().map(|x| *x as u32).collect(),
        (PrimitiveValue::I16(v), _) => v.iter().map(|x| (*x).max(0) as u32).collect(),
        (PrimitiveValue::U8(bytes), 32) => bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (PrimitiveValue::U8(bytes), 16) => bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)
            .collect(),
        (PrimitiveValue::U8(bytes), _) => bytes.iter().map(|b| *b as u32).collect(),
        _ => {
            return Err(DvhcatError::Parse(format!(
                "unsupported PixelData value type for {} bits",
                bits_allocated
            )))
        }
    };
    Ok(pixels)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::extraction::plan::fixtures::{decimals, sequence, text};
    use dicom_core::{DataElement, VR};
    use dicom_object::FileMetaTableBuilder;
    use std::path::Path;

    /// Writes a dose object as a Part 10 file
    pub fn write_dose_file(dcm: InMemDicomObject, path: &Path, transfer_syntax: &str) {
        let sop = get_string_value(&dcm, SOP_INSTANCE_UID).unwrap();
        dcm.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(transfer_syntax)
                .media_storage_sop_class_uid(crate::types::RT_DOSE_STORAGE)
                .media_storage_sop_instance_uid(sop),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
    }

    /// Dose object with `frames × rows × columns` voxels of 2.5 mm spacing
    pub fn dose_object(
        sop: &str,
        plan_uid: &str,
        origin: [f64; 3],
        shape: (usize, usize, usize),
        values: Vec<u32>,
        scaling: f64,
    ) -> InMemDicomObject {
        let (frames, rows, columns) = shape;
        let offsets: Vec<f64> = (0..frames).map(|i| i as f64 * 2.5).collect();
        let plan_ref = InMemDicomObject::from_element_iter([text(
            REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            plan_uid,
        )]);

        InMemDicomObject::from_element_iter([
            text(MODALITY, VR::CS, "RTDOSE"),
            text(SOP_INSTANCE_UID, VR::UI, sop),
            text(STUDY_INSTANCE_UID, VR::UI, "9.9"),
            text(PATIENT_ID, VR::LO, "MRN001"),
            text(DOSE_SUMMATION_TYPE, VR::CS, "PLAN"),
            text(DOSE_UNITS, VR::CS, "GY"),
            text(TISSUE_HETEROGENEITY_CORRECTION, VR::CS, "IMAGE"),
            DataElement::new(ROWS, VR::US, PrimitiveValue::from(rows as u16)),
            DataElement::new(COLUMNS, VR::US, PrimitiveValue::from(columns as u16)),
            text(NUMBER_OF_FRAMES, VR::IS, &frames.to_string()),
            DataElement::new(BITS_ALLOCATED, VR::US, PrimitiveValue::from(32u16)),
            decimals(PIXEL_SPACING, &[2.5, 2.5]),
            decimals(IMAGE_POSITION_PATIENT, &origin),
            decimals(IMAGE_ORIENTATION_PATIENT, &IDENTITY_ORIENTATION),
            decimals(GRID_FRAME_OFFSET_VECTOR, &offsets),
            decimals(DOSE_GRID_SCALING, &[scaling]),
            sequence(REFERENCED_RT_PLAN_SEQUENCE, vec![plan_ref]),
            DataElement::new(PIXEL_DATA, VR::OW, PrimitiveValue::U32(values.into())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{dose_object, write_dose_file as write};
    use super::*;
    use dicom_core::{DataElement, VR};
    use dicom_dictionary_std::uids;
    use tempfile::TempDir;

    fn read_all(dose: &DoseRecord) -> Vec<u32> {
        let mut out = Vec::new();
        dose.open_frames()
            .unwrap()
            .read_frames(0, dose.geometry.frames, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_dose_from_dicom() {
        let dcm = dose_object("3.3", "1.1.1", [-5.0, -5.0, -10.0], (2, 2, 3), (0..12).collect(), 0.5);
        let dose = DoseRecord::from_dicom(PathBuf::from("dose.dcm"), &dcm).unwrap();

        assert_eq!(dose.referenced_plan_uid.as_deref(), Some("1.1.1"));
        assert_eq!(dose.summation_type, Some(DoseSummationType::Plan));
        assert_eq!(dose.geometry.frames, 2);
        assert_eq!(dose.geometry.frame_offsets, vec![0.0, 2.5]);
        assert!(matches!(dose.pixels, PixelSource::Decoded(_)));

        let mut out = Vec::new();
        dose.open_frames().unwrap().read_frames(1, 2, &mut out).unwrap();
        assert_eq!(out, vec![6, 7, 8, 9, 10, 11]);

        let grid = dose.to_grid().unwrap();
        assert_eq!(grid.values[[1, 0, 2]], 4.0);
        assert_eq!(dose.materialized_bytes(), 96);
    }

    #[test]
    fn test_file_pixels_stay_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dose.dcm");
        let dcm = dose_object("3.3", "1.1.1", [-5.0, -5.0, -10.0], (3, 2, 2), (0..12).collect(), 0.5);
        write(dcm, &path, uids::EXPLICIT_VR_LITTLE_ENDIAN);

        let dose = DoseRecord::from_file(path.clone()).unwrap();
        let PixelSource::Native { offset, bytes_per_value, .. } = &dose.pixels else {
            panic!("expected native pixel data, got {:?}", dose.pixels);
        };
        assert_eq!(*bytes_per_value, 4);
        assert_eq!(*offset, std::fs::metadata(&path).unwrap().len() - 48);

        let mut reader = dose.open_frames().unwrap();
        let mut out = Vec::new();
        reader.read_frames(2, 3, &mut out).unwrap();
        assert_eq!(out, vec![8, 9, 10, 11]);
        reader.read_frames(0, 1, &mut out).unwrap();
        assert_eq!(out, vec![0, 1, 2, 3]);
        reader.read_frames(2, 9, &mut out).unwrap();
        assert_eq!(out.len(), 4);

        assert_eq!(dose.to_grid().unwrap().values[[2, 1, 1]], 5.5);
    }

    #[test]
    fn test_implicit_file_pixels_stay_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dose.dcm");
        let dcm = dose_object("3.3", "1.1.1", [0.0; 3], (2, 2, 2), (0..8).collect(), 1.0);
        write(dcm, &path, uids::IMPLICIT_VR_LITTLE_ENDIAN);

        let dose = DoseRecord::from_file(path).unwrap();
        assert!(matches!(dose.pixels, PixelSource::Native { .. }));
        assert_eq!(read_all(&dose), (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn test_unlocated_pixels_decode_on_demand() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dose.dcm");
        // declared geometry larger than the pixel data
        let dcm = dose_object("3.3", "1.1.1", [0.0; 3], (2, 2, 2), (0..6).collect(), 1.0);
        write(dcm, &path, uids::EXPLICIT_VR_LITTLE_ENDIAN);

        let dose = DoseRecord::from_file(path).unwrap();
        assert!(matches!(dose.pixels, PixelSource::Object { .. }));
        assert!(matches!(dose.open_frames(), Err(DvhcatError::Parse(_))));
    }

    #[test]
    fn test_pixel_count_mismatch_is_parse_error() {
        let dcm = dose_object("3.3", "1.1.1", [0.0, 0.0, 0.0], (2, 2, 3), vec![1, 2, 3], 1.0);
        let result = DoseRecord::from_dicom(PathBuf::from("dose.dcm"), &dcm);
        assert!(matches!(result, Err(DvhcatError::Parse(_))));
    }

    #[test]
    fn test_decode_u16_pairs_as_32_bit() {
        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(
            PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(vec![1u16, 0, 0, 1].into()),
        ));
        assert_eq!(decode_pixels(&dcm, 32).unwrap(), vec![1, 65536]);
        assert_eq!(decode_pixels(&dcm, 16).unwrap(), vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_decode_bytes() {
        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(
            PIXEL_DATA,
            VR::OB,
            PrimitiveValue::U8(vec![1u8, 1, 0, 0].into()),
        ));
        assert_eq!(decode_pixels(&dcm, 32).unwrap(), vec![257]);
        assert_eq!(decode_pixels(&dcm, 16).unwrap(), vec![257, 0]);
    }

    #[test]
    fn test_absolute_frame_offsets_become_relative() {
        assert_eq!(relative_offsets(vec![-10.0, -7.5], -10.0), vec![0.0, 2.5]);
        assert_eq!(relative_offsets(vec![0.0, 2.5], -10.0), vec![0.0, 2.5]);
    }
}
