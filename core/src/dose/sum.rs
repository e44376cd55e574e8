use crate::cancel::CancellationToken;
use crate::error::{DvhcatError, Result};
use crate::extraction::dose::DoseRecord;
use crate::types::ImportConfig;
use log::{debug, warn};
use ndarray::Zip;

use super::grid::DoseGrid;

/// How a summed grid was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummationPath {
    /// Every member materialized, then added elementwise
    InMemory,
    /// Members decoded and added chunk by chunk into one accumulator
    Streaming,
}

/// Result of summing the dose grids of one summation domain
#[derive(Debug, Clone)]
pub struct SummedDose {
    pub grid: DoseGrid,
    pub path: SummationPath,
    pub members: usize,
}

/// Sums dose grids elementwise
///
/// Members are added in SOP instance UID order so that the result does not
/// depend on the order they were discovered in. Both paths add voxel values
/// in that same order and produce identical arrays.
///
/// # Errors
///
/// - `GridMismatch` when any member does not share the first member's
///   geometry within `grid_tolerance_mm`, or when there is nothing to sum
/// - `ResourceExhaustion` when even the streaming accumulator cannot be
///   allocated
/// - `Cancelled`
pub fn sum_doses(
    doses: &[DoseRecord],
    config: &ImportConfig,
    cancel: &CancellationToken,
) -> Result<SummedDose> {
    let mut members: Vec<&DoseRecord> = doses.iter().collect();
    members.sort_by(|a, b| a.sop_instance_uid.cmp(&b.sop_instance_uid));
    let first = *members
        .first()
        .ok_or_else(|| DvhcatError::GridMismatch("no dose grids to sum".to_string()))?;
    for other in &members[1..] {
        first
            .geometry
            .check_compatible(&other.geometry, config.grid_tolerance_mm)
            .map_err(|e| match e {
                DvhcatError::GridMismatch(msg) => DvhcatError::GridMismatch(format!(
                    "{} vs {}: {}",
                    first.sop_instance_uid, other.sop_instance_uid, msg
                )),
                e => e,
            })?;
    }

    // accumulator plus one materialized member; estimated from headers only
    let copies = if members.len() > 1 { 2 } else { 1 };
    let estimate = first.materialized_bytes().saturating_mul(copies);
    if estimate > config.memory_threshold_bytes {
        debug!(
            "Estimated {} bytes exceeds {}; streaming {} dose grids",
            estimate,
            config.memory_threshold_bytes,
            members.len()
        );
        return sum_streaming(&members, config, cancel);
    }

    match sum_in_memory(&members, cancel) {
        Err(DvhcatError::ResourceExhaustion(msg)) => {
            warn!("In-memory dose summation failed ({}); streaming instead", msg);
            sum_streaming(&members, config, cancel)
        }
        other => other,
    }
}

fn sum_in_memory(members: &[&DoseRecord], cancel: &CancellationToken) -> Result<SummedDose> {
    cancel.check()?;
    let mut grid = members[0].to_grid()?;
    for member in &members[1..] {
        cancel.check()?;
        let other = member.to_grid()?;
        Zip::from(&mut grid.values)
            .and(&other.values)
            .par_for_each(|acc, v| *acc += *v);
    }
    Ok(SummedDose {
        grid,
        path: SummationPath::InMemory,
        members: members.len(),
    })
}

/// Adds every member into one accumulator, reading `stream_chunk_frames`
/// frames of one member at a time
///
/// Peak memory is the accumulator plus one chunk of stored values. Each
/// voxel still receives the members in the same order as the in-memory path.
fn sum_streaming(
    members: &[&DoseRecord],
    config: &ImportConfig,
    cancel: &CancellationToken,
) -> Result<SummedDose> {
    let geometry = members[0].geometry.clone();
    let frame_len = geometry.frame_len();
    let frames = geometry.frames;
    let chunk = config.stream_chunk_frames.max(1);

    let mut grid = DoseGrid::zeros(geometry)?;
    let flat = grid
        .values
        .as_slice_mut()
        .ok_or_else(|| DvhcatError::InvalidValue("dose accumulator is not contiguous".to_string()))?;

    let mut stored: Vec<u32> = Vec::new();
    stored
        .try_reserve_exact(chunk.min(frames) * frame_len)
        .map_err(|e| DvhcatError::ResourceExhaustion(format!("cannot allocate dose chunk: {}", e)))?;
    for member in members {
        cancel.check()?;
        let scaling = member.scaling;
        let mut reader = member.open_frames()?;
        for start in (0..frames).step_by(chunk) {
            cancel.check()?;
            let end = (start + chunk).min(frames);
            reader.read_frames(start, end, &mut stored)?;
            let out = &mut flat[start * frame_len..end * frame_len];
            for (acc, value) in out.iter_mut().zip(&stored) {
                *acc += *value as f64 * scaling;
            }
        }
    }

    Ok(SummedDose {
        grid,
        path: SummationPath::Streaming,
        members: members.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::dose::fixtures::{dose_object, write_dose_file};
    use crate::extraction::dose::PixelSource;
    use dicom_dictionary_std::uids;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn dose(sop: &str, origin: [f64; 3], values: Vec<u32>, scaling: f64) -> DoseRecord {
        let dcm = dose_object(sop, "1.1.1", origin, (3, 2, 2), values, scaling);
        DoseRecord::from_dicom(PathBuf::from(format!("{}.dcm", sop)), &dcm).unwrap()
    }

    fn members() -> Vec<DoseRecord> {
        vec![
            dose("3.1", [0.0; 3], (0..12).collect(), 0.1),
            dose("3.2", [0.0; 3], (0..12).rev().collect(), 0.3),
            dose("3.3", [0.0; 3], vec![7; 12], 0.7),
        ]
    }

    #[test]
    fn test_sum_is_order_independent() {
        let config = ImportConfig::default();
        let cancel = CancellationToken::new();
        let forward = members();
        let mut reversed = members();
        reversed.reverse();
        let mut rotated = members();
        rotated.rotate_left(1);

        let a = sum_doses(&forward, &config, &cancel).unwrap();
        let b = sum_doses(&reversed, &config, &cancel).unwrap();
        let c = sum_doses(&rotated, &config, &cancel).unwrap();
        assert_eq!(a.grid.values, b.grid.values);
        assert_eq!(a.grid.values, c.grid.values);
        assert_eq!(a.path, SummationPath::InMemory);
        assert_eq!(a.members, 3);

        let expected = 0.0 * 0.1 + 11.0 * 0.3 + 7.0 * 0.7;
        assert!((a.grid.values[[0, 0, 0]] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_streaming_matches_in_memory() {
        let cancel = CancellationToken::new();
        let in_memory = sum_doses(&members(), &ImportConfig::default(), &cancel).unwrap();

        let mut config = ImportConfig::default().with_memory_threshold(0);
        config.stream_chunk_frames = 2;
        let streamed = sum_doses(&members(), &config, &cancel).unwrap();

        assert_eq!(streamed.path, SummationPath::Streaming);
        assert_eq!(streamed.grid.values, in_memory.grid.values);
    }

    #[test]
    fn test_streaming_reads_files_in_chunks() {
        let dir = TempDir::new().unwrap();
        let values: [(&str, Vec<u32>, f64); 3] = [
            ("3.1", (0..12).collect(), 0.1),
            ("3.2", (0..12).rev().collect(), 0.3),
            ("3.3", vec![7; 12], 0.7),
        ];
        let mut on_disk = Vec::new();
        for (sop, stored, scaling) in values {
            let path = dir.path().join(format!("{}.dcm", sop));
            let dcm = dose_object(sop, "1.1.1", [0.0; 3], (3, 2, 2), stored, scaling);
            write_dose_file(dcm, &path, uids::EXPLICIT_VR_LITTLE_ENDIAN);
            let record = DoseRecord::from_file(path).unwrap();
            assert!(matches!(record.pixels, PixelSource::Native { .. }));
            on_disk.push(record);
        }

        let cancel = CancellationToken::new();
        let mut config = ImportConfig::default().with_memory_threshold(0);
        config.stream_chunk_frames = 2;
        let streamed = sum_doses(&on_disk, &config, &cancel).unwrap();
        let in_memory = sum_doses(&members(), &ImportConfig::default(), &cancel).unwrap();

        assert_eq!(streamed.path, SummationPath::Streaming);
        assert_eq!(streamed.grid.values, in_memory.grid.values);
    }

    #[test]
    fn test_misaligned_origin_is_rejected() {
        let doses = vec![
            dose("3.1", [0.0; 3], vec![1; 12], 1.0),
            dose("3.2", [1.0, 0.0, 0.0], vec![1; 12], 1.0),
        ];
        let result = sum_doses(&doses, &ImportConfig::default(), &CancellationToken::new());
        assert!(matches!(result, Err(DvhcatError::GridMismatch(_))));
    }

    #[test]
    fn test_single_member() {
        let doses = vec![dose("3.1", [0.0; 3], (0..12).collect(), 0.5)];
        let summed = sum_doses(&doses, &ImportConfig::default(), &CancellationToken::new()).unwrap();
        assert_eq!(summed.grid.values[[2, 1, 1]], 5.5);
        assert!(sum_doses(&[], &ImportConfig::default(), &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_cancelled_streaming() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = ImportConfig::default().with_memory_threshold(0);
        let result = sum_doses(&members(), &config, &cancel);
        assert!(matches!(result, Err(DvhcatError::Cancelled)));
    }
}
