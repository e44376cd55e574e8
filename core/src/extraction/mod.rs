//! Typed records extracted from RT Plan, RT Dose and RT Structure Set objects
//!
//! Every field read from a DICOM object goes through the helpers in [`tags`],
//! which turn absent, blank or unparsable values into `None`. Fallback chains
//! for individual fields are documented where the field is extracted.

pub mod dose;
pub mod plan;
pub mod structure;
pub mod tags;

pub use dose::DoseRecord;
pub use plan::{BeamRecord, ControlPoint, DevicePositions, PlanRecord, RxRecord};
pub use structure::{RoiRecord, StructureSetRecord};
pub use tags::*;
