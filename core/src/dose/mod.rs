//! Dose grid engine
//!
//! Materializes RT Dose pixel data, validates geometric compatibility of the
//! grids of one summation domain and sums them, switching to a chunked
//! streaming path when the in-memory estimate exceeds the configured limit.

mod grid;
mod sum;

pub use grid::{sample_bilinear, DoseGeometry, DoseGrid};
pub use sum::{sum_doses, SummationPath, SummedDose};

#[cfg(test)]
pub(crate) use grid::fixtures;
