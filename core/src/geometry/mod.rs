//! Contour geometry
//!
//! Slice-wise polygon model of ROIs and everything derived from it: volume,
//! surface area, centroid, spread, cross-sections, distances to the target
//! union and overlap with it.

mod contour;
mod distance;
mod index;
mod polygon;
mod raster;
mod target;

pub use contour::{ContourPlane, ContourSlice, RoiContour, RoiMetrics};
pub use distance::{distance_to_target, overlap_volume_histogram, DistanceMetrics, Histogram};
pub use index::{sample_evenly, PointIndex};
pub use polygon::{Ring, SliceRegion};
pub use raster::{covered_fraction, interior_samples};
pub use target::TargetReference;

#[cfg(test)]
pub(crate) use contour::fixtures;
