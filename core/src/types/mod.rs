//! Core type definitions shared across the import pipeline
//!
//! - [`FileRole`]: role of a sniffed file (plan, dose, structure, other)
//! - [`RoiType`]: RT ROI interpreted type, with map overrides
//! - [`DoseSummationType`]: dose object summation type
//! - [`PixelSpacing`]: in-plane dose grid spacing
//! - [`Point3`]: patient coordinate point in mm
//! - [`SummaryStats`]: max/75th/median/mean/25th/min summary
//! - [`ImportConfig`]: explicit configuration of one import run

mod config;
mod enums;
mod pixel_spacing;
mod point;
mod stats;

pub use config::ImportConfig;
pub use enums::{
    DoseSummationType, FileRole, RoiType, RotationDirection, RT_DOSE_STORAGE,
    RT_ION_PLAN_STORAGE, RT_PLAN_STORAGE, RT_STRUCTURE_SET_STORAGE,
};
pub use pixel_spacing::{parse_decimals, PixelSpacing};
pub use point::Point3;
pub use stats::{percentile_sorted, SummaryStats};
