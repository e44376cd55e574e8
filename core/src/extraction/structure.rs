use crate::error::{DvhcatError, Result};
use crate::geometry::{ContourPlane, RoiContour};
use crate::types::RoiType;
use dicom_object::{open_file, InMemDicomObject};
use log::debug;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::tags::*;

/// One ROI of a structure set
#[derive(Debug, Clone, PartialEq)]
pub struct RoiRecord {
    pub number: i32,
    pub name: String,
    pub roi_type: RoiType,
    /// Planar contours grouped by plane, sorted by z
    pub planes: Vec<ContourPlane>,
}

impl RoiRecord {
    /// Whether any planar contour was found for this ROI
    pub fn has_contours(&self) -> bool {
        !self.planes.is_empty()
    }

    /// Builds the slice model, using `slice_spacing` for single-slice ROIs
    pub fn contour(&self, slice_spacing: Option<f64>) -> Result<RoiContour> {
        RoiContour::new(self.planes.clone(), slice_spacing).map_err(|e| match e {
            DvhcatError::Geometry(msg) => DvhcatError::Geometry(format!("{}: {}", self.name, msg)),
            other => other,
        })
    }
}

/// RT Structure Set content needed for import
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSetRecord {
    pub file_path: PathBuf,
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub series_instance_uid: Option<String>,
    pub patient_id: String,
    pub label: Option<String>,
    pub time_stamp: Option<String>,
    /// Smallest gap between distinct contour planes of the whole set, mm
    pub slice_spacing: Option<f64>,
    pub rois: Vec<RoiRecord>,
}

impl StructureSetRecord {
    /// Creates a structure set record from a DICOM file path
    pub fn from_file(path: PathBuf) -> Result<Self> {
        let dcm = open_file(&path)?;
        Self::from_dicom(path, &dcm)
    }

    /// Creates a structure set record from an already-opened DICOM object
    ///
    /// ROIs are listed in StructureSetROISequence order. POINT contours and
    /// rings with fewer than three vertices are left out.
    ///
    /// # Errors
    ///
    /// Returns `Parse` when a required identifier is missing
    pub fn from_dicom(path: PathBuf, dcm: &InMemDicomObject) -> Result<Self> {
        let missing = |name: &str| DvhcatError::Parse(format!("{}: missing {}", path.display(), name));
        let sop_instance_uid =
            get_string_value(dcm, SOP_INSTANCE_UID).ok_or_else(|| missing("SOPInstanceUID"))?;
        let study_instance_uid =
            get_string_value(dcm, STUDY_INSTANCE_UID).ok_or_else(|| missing("StudyInstanceUID"))?;
        let patient_id = get_string_value(dcm, PATIENT_ID).ok_or_else(|| missing("PatientID"))?;

        let types: BTreeMap<i32, RoiType> = get_items(dcm, RT_ROI_OBSERVATIONS_SEQUENCE)
            .iter()
            .filter_map(|item| {
                let number = get_int_value(item, REFERENCED_ROI_NUMBER)?;
                let roi_type = get_string_value(item, RT_ROI_INTERPRETED_TYPE)
                    .map(|s| RoiType::from_str(&s))
                    .unwrap_or_default();
                Some((number, roi_type))
            })
            .collect();

        let mut contours: BTreeMap<i32, Vec<ContourPlane>> = get_items(dcm, ROI_CONTOUR_SEQUENCE)
            .iter()
            .filter_map(|item| {
                let number = get_int_value(item, REFERENCED_ROI_NUMBER)?;
                Some((number, extract_planes(item)))
            })
            .collect();

        let rois: Vec<RoiRecord> = get_items(dcm, STRUCTURE_SET_ROI_SEQUENCE)
            .iter()
            .filter_map(|item| {
                let number = get_int_value(item, ROI_NUMBER)?;
                let name = get_string_value(item, ROI_NAME).unwrap_or_else(|| format!("ROI {}", number));
                Some(RoiRecord {
                    number,
                    name,
                    roi_type: types.get(&number).cloned().unwrap_or_default(),
                    planes: contours.remove(&number).unwrap_or_default(),
                })
            })
            .collect();
        debug!("{}: {} ROIs", path.display(), rois.len());

        Ok(Self {
            slice_spacing: min_plane_spacing(&rois),
            sop_instance_uid,
            study_instance_uid,
            series_instance_uid: get_string_value(dcm, SERIES_INSTANCE_UID),
            patient_id,
            label: get_string_value(dcm, STRUCTURE_SET_LABEL),
            time_stamp: get_date_time(dcm, STRUCTURE_SET_DATE, STRUCTURE_SET_TIME),
            rois,
            file_path: path,
        })
    }

    pub fn roi(&self, name: &str) -> Option<&RoiRecord> {
        self.rois.iter().find(|r| r.name == name)
    }
}

/// Plane key: z in hundredths of a mm
fn plane_key(z: f64) -> i64 {
    (z * 100.0).round() as i64
}

/// Groups the planar contours of one ROIContourSequence item by plane
fn extract_planes(item: &InMemDicomObject) -> Vec<ContourPlane> {
    let mut planes: BTreeMap<i64, ContourPlane> = BTreeMap::new();
    for contour in get_items(item, CONTOUR_SEQUENCE) {
        let kind = get_string_value(contour, CONTOUR_GEOMETRIC_TYPE).unwrap_or_default();
        if kind.eq_ignore_ascii_case("POINT") {
            continue;
        }
        let Some(data) = get_multi_float_value(contour, CONTOUR_DATA) else {
            continue;
        };
        if data.len() < 9 || data.len() % 3 != 0 {
            continue;
        }
        let z = data[2];
        let ring: Vec<[f64; 2]> = data.chunks_exact(3).map(|p| [p[0], p[1]]).collect();
        planes
            .entry(plane_key(z))
            .or_insert_with(|| ContourPlane { z, rings: Vec::new() })
            .rings
            .push(ring);
    }
    planes.into_values().collect()
}

fn min_plane_spacing(rois: &[RoiRecord]) -> Option<f64> {
    let mut keys: Vec<i64> = rois
        .iter()
        .flat_map(|r| r.planes.iter().map(|p| plane_key(p.z)))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys.windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0)
        .min()
        .map(|gap| gap as f64 / 100.0)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::extraction::plan::fixtures::{decimals, sequence, text};
    use dicom_core::VR;

    fn sample() -> StructureSetRecord {
        let dcm = structure_set(
            "2.2.2",
            "9.9",
            vec![
                square_roi(1, "PTV", "PTV", 0.0, 0.0, 10.0, &[-2.5, 0.0, 2.5]),
                square_roi(2, "Lung_L", "ORGAN", 30.0, 0.0, 10.0, &[-5.0, -2.5, 0.0, 2.5, 5.0]),
            ],
        );
        StructureSetRecord::from_dicom(PathBuf::from("rs.dcm"), &dcm).unwrap()
    }

    #[test]
    fn test_structure_set_from_dicom() {
        let ss = sample();
        assert_eq!(ss.sop_instance_uid, "2.2.2");
        assert_eq!(ss.time_stamp.as_deref(), Some("20240111120000"));
        assert_eq!(ss.rois.len(), 2);
        assert_eq!(ss.slice_spacing, Some(2.5));

        let ptv = ss.roi("PTV").unwrap();
        assert_eq!(ptv.roi_type, RoiType::Ptv);
        assert_eq!(ptv.planes.len(), 3);
        assert_eq!(ptv.planes[0].rings[0].len(), 4);

        let lung = ss.roi("Lung_L").unwrap();
        assert_eq!(lung.roi_type, RoiType::Organ);
        let contour = lung.contour(ss.slice_spacing).unwrap();
        // 20 × 20 mm × 5 slices × 2.5 mm
        assert!((contour.volume_mm3() - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn test_point_contours_and_tiny_rings_are_skipped() {
        let roi = InMemDicomObject::from_element_iter([
            text(ROI_NUMBER, VR::IS, "7"),
            text(ROI_NAME, VR::LO, "Marker"),
        ]);
        let point = InMemDicomObject::from_element_iter([
            text(CONTOUR_GEOMETRIC_TYPE, VR::CS, "POINT"),
            decimals(CONTOUR_DATA, &[1.0, 2.0, 3.0]),
        ]);
        let line = InMemDicomObject::from_element_iter([
            text(CONTOUR_GEOMETRIC_TYPE, VR::CS, "OPEN_PLANAR"),
            decimals(CONTOUR_DATA, &[0.0, 0.0, 3.0, 1.0, 1.0, 3.0]),
        ]);
        let roi_contour = InMemDicomObject::from_element_iter([
            text(REFERENCED_ROI_NUMBER, VR::IS, "7"),
            sequence(CONTOUR_SEQUENCE, vec![point, line]),
        ]);
        let observation = InMemDicomObject::from_element_iter([text(REFERENCED_ROI_NUMBER, VR::IS, "7")]);
        let dcm = structure_set("2.2.3", "9.9", vec![(roi, observation, roi_contour)]);
        let ss = StructureSetRecord::from_dicom(PathBuf::from("rs.dcm"), &dcm).unwrap();

        let marker = ss.roi("Marker").unwrap();
        assert!(!marker.has_contours());
        assert!(marker.roi_type.is_none());
        assert!(matches!(marker.contour(None), Err(DvhcatError::Geometry(_))));
    }

    #[test]
    fn test_rings_on_one_plane_are_grouped() {
        let planes = extract_planes(&InMemDicomObject::from_element_iter([sequence(
            CONTOUR_SEQUENCE,
            vec![
                InMemDicomObject::from_element_iter([decimals(
                    CONTOUR_DATA,
                    &[0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0],
                )]),
                InMemDicomObject::from_element_iter([decimals(
                    CONTOUR_DATA,
                    &[5.0, 5.0, 1.001, 6.0, 5.0, 1.001, 6.0, 6.0, 1.001],
                )]),
            ],
        )]));
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].rings.len(), 2);
    }

    #[test]
    fn test_missing_patient_is_parse_error() {
        let dcm = InMemDicomObject::from_element_iter([
            text(SOP_INSTANCE_UID, VR::UI, "2.2"),
            text(STUDY_INSTANCE_UID, VR::UI, "9.9"),
        ]);
        let result = StructureSetRecord::from_dicom(PathBuf::from("rs.dcm"), &dcm);
        assert!(matches!(result, Err(DvhcatError::Parse(_))));
    }
}
