pub mod association;
pub mod cancel;
pub mod cli;
pub mod complexity;
pub mod dose;
pub mod dvh;
pub mod error;
pub mod extraction;
pub mod geometry;
mod persist;
pub mod pipeline;
pub mod roi_map;
pub mod rows;
pub mod types;

pub use association::{associate, discover_files, CandidateFile, Manifest, StudyGroup};
pub use cancel::CancellationToken;
pub use cli::report::TextReport;
pub use complexity::{ApertureScorer, ControlPointScorer};
pub use error::{DvhcatError, Result};
pub use pipeline::{ImportHandle, ImportPipeline, ImportReport, StudyOutcome};
pub use roi_map::{Resolution, RoiNameMap};
pub use rows::{BeamRow, DuplicatePolicy, DvhRow, JsonLinesSink, MemorySink, PlanRow, RowSink, RowStore, RxRow, StudyRows};
pub use types::*;
