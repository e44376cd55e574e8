use crate::rows::{DvhRow, PlanRow};
use log::debug;
use std::collections::HashMap;

use super::map::{RoiNameMap, DEFAULT_PHYSICIAN, UNCATEGORIZED};

/// Re-resolves stored DVHs rows against the current map
///
/// The physician of a row comes from the Plans row with the same
/// `(mrn, study_instance_uid)`. Rows whose raw name no longer resolves go
/// back to `uncategorized`; a map type override replaces `roi_type`.
/// Returns the number of rows changed.
pub fn remap_dvh_rows(map: &RoiNameMap, plans: &[PlanRow], dvhs: &mut [DvhRow]) -> usize {
    let physicians: HashMap<(&str, &str), &str> = plans
        .iter()
        .map(|p| ((p.mrn.as_str(), p.study_instance_uid.as_str()), p.physician.as_str()))
        .collect();

    let mut changed = 0;
    for row in dvhs.iter_mut() {
        let physician = physicians
            .get(&(row.mrn.as_str(), row.study_instance_uid.as_str()))
            .copied()
            .unwrap_or(DEFAULT_PHYSICIAN);
        let (institutional, physician_roi, roi_type) = match map.resolve_exact(physician, &row.roi_name) {
            Some(mapping) => (
                mapping.institutional_roi,
                mapping.physician_roi,
                mapping
                    .roi_type
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_else(|| row.roi_type.clone()),
            ),
            None => (
                UNCATEGORIZED.to_string(),
                UNCATEGORIZED.to_string(),
                row.roi_type.clone(),
            ),
        };
        if row.institutional_roi != institutional || row.physician_roi != physician_roi || row.roi_type != roi_type {
            debug!(
                "{} / {}: {} -> {}/{}",
                row.study_instance_uid, row.roi_name, row.physician_roi, physician_roi, institutional
            );
            row.institutional_roi = institutional;
            row.physician_roi = physician_roi;
            row.roi_type = roi_type;
            changed += 1;
        }
    }
    changed
}
