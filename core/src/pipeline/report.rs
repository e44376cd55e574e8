use crate::error::DvhcatError;
use crate::roi_map::Suggestion;
use serde::Serialize;
use std::path::PathBuf;

/// A file that could not be sniffed or parsed
#[derive(Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: DvhcatError,
}

/// A recoverable failure inside an imported study
///
/// `roi` is `None` for study-wide problems such as a dose grid mismatch.
#[derive(Debug, Serialize)]
pub struct StudyWarning {
    pub roi: Option<String>,
    pub error: DvhcatError,
}

impl StudyWarning {
    pub fn study(error: DvhcatError) -> Self {
        Self { roi: None, error }
    }

    pub fn roi(name: &str, error: DvhcatError) -> Self {
        Self {
            roi: Some(name.to_string()),
            error,
        }
    }
}

/// A raw ROI name nobody has mapped yet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameReview {
    pub patient_id: String,
    pub study_instance_uid: String,
    pub physician: String,
    pub roi_name: String,
    /// Best first; never applied automatically
    pub suggestions: Vec<Suggestion>,
}

/// Result of one study
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StudyOutcome {
    Imported {
        patient_id: String,
        study_instance_uid: String,
        plans: usize,
        rois: usize,
        /// Whether dose-derived fields were filled
        dose_available: bool,
        warnings: Vec<StudyWarning>,
    },
    Failed {
        patient_id: Option<String>,
        study_instance_uid: String,
        error: DvhcatError,
    },
    /// The sink already holds this study; nothing was processed
    AlreadyImported {
        patient_id: String,
        study_instance_uid: String,
    },
}

impl StudyOutcome {
    pub fn study_instance_uid(&self) -> &str {
        match self {
            StudyOutcome::Imported {
                study_instance_uid, ..
            }
            | StudyOutcome::Failed {
                study_instance_uid, ..
            }
            | StudyOutcome::AlreadyImported {
                study_instance_uid, ..
            } => study_instance_uid,
        }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self, StudyOutcome::Imported { .. })
    }

    /// Warnings of an imported study; empty otherwise
    pub fn warnings(&self) -> &[StudyWarning] {
        match self {
            StudyOutcome::Imported { warnings, .. } => warnings,
            StudyOutcome::Failed { .. } | StudyOutcome::AlreadyImported { .. } => &[],
        }
    }
}

/// Everything one import run did, per file and per study
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub files_found: usize,
    pub skipped: Vec<SkippedFile>,
    /// Files whose role is neither plan, dose nor structure
    pub ignored: usize,
    /// In manifest order, association failures first
    pub outcomes: Vec<StudyOutcome>,
    pub reviews: Vec<NameReview>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_imported()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, StudyOutcome::Failed { .. }))
            .count()
    }

    pub fn already_imported(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, StudyOutcome::AlreadyImported { .. }))
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.warnings().len()).sum()
    }
}
