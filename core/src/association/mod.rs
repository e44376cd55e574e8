//! File-set association
//!
//! Discovered files are sniffed into [`CandidateFile`]s, then grouped by
//! study into [`StudyGroup`]s holding one plan domain, a dose per plan and a
//! structure set. Studies that cannot be resolved uniquely are reported in
//! the [`Manifest`] and never abort the others.

mod candidate;
mod studies;

pub use candidate::{discover_files, is_dicom_file, sniff_file, CandidateFile};
pub use studies::{associate, AssociationFailure, Manifest, PlanDose, StudyGroup};

#[cfg(test)]
pub(crate) use candidate::fixtures;
