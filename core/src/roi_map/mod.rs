//! Institutional/physician ROI name reconciliation
//!
//! Raw structure names are resolved through a versioned two-level map:
//! a physician's variations point to a physician ROI, which points to an
//! institutional ROI. Exact matches resolve; misses are held as
//! uncategorized with fuzzy suggestions for manual curation. Map edits are
//! recorded in an audit trail and can be replayed onto stored rows with
//! [`remap_dvh_rows`].

mod fuzzy;
mod map;
mod name;
mod remap;
mod store;

pub use fuzzy::{combined_score, partial_ratio, ratio};
pub use map::{
    AuditEntry, MapEdit, PhysicianRoi, PhysicianRois, Resolution, RoiMapping, RoiNameMap, Suggestion,
    DEFAULT_PHYSICIAN, UNCATEGORIZED,
};
pub use name::{clean_name, clean_physician_name};
pub use remap::remap_dvh_rows;
pub use store::import_legacy_roi_file;

#[cfg(test)]
pub(crate) use map::fixtures;
