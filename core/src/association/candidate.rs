use crate::error::{DvhcatError, Result};
use crate::extraction::tags::*;
use crate::types::{DoseSummationType, FileRole};
use chrono::{DateTime, Utc};
use dicom_object::{InMemDicomObject, OpenFileOptions};
use log::debug;
use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// A discovered file after cheap header sniffing
///
/// Only the identifiers needed to group files into studies are read; the
/// full record is extracted later, when the study is processed.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Filesystem modification time
    pub modified: Option<DateTime<Utc>>,
    pub role: FileRole,
    pub patient_id: String,
    pub study_instance_uid: String,
    pub series_instance_uid: Option<String>,
    pub sop_instance_uid: String,
    /// Plan referenced by a dose
    pub referenced_plan_uid: Option<String>,
    /// Structure set referenced by a plan
    pub referenced_structure_uid: Option<String>,
    pub summation_type: Option<DoseSummationType>,
}

impl CandidateFile {
    /// Sniffs a file, reading its header up to PixelData
    pub fn from_file(path: PathBuf) -> Result<Self> {
        let dcm = OpenFileOptions::new()
            .read_until(PIXEL_DATA)
            .open_file(&path)
            .map_err(|e| DvhcatError::Parse(format!("{}: {}", path.display(), e)))?;
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self::from_dicom(path, &dcm, modified)
    }

    /// Builds a candidate from an opened header
    ///
    /// # Errors
    ///
    /// Returns `Parse` when StudyInstanceUID, SOPInstanceUID, PatientID or
    /// Modality is missing
    pub fn from_dicom(path: PathBuf, dcm: &InMemDicomObject, modified: Option<DateTime<Utc>>) -> Result<Self> {
        let missing = |name: &str| DvhcatError::Parse(format!("{}: missing {}", path.display(), name));
        let modality = get_string_value(dcm, MODALITY).ok_or_else(|| missing("Modality"))?;
        let study_instance_uid =
            get_string_value(dcm, STUDY_INSTANCE_UID).ok_or_else(|| missing("StudyInstanceUID"))?;
        let sop_instance_uid =
            get_string_value(dcm, SOP_INSTANCE_UID).ok_or_else(|| missing("SOPInstanceUID"))?;
        let patient_id = get_string_value(dcm, PATIENT_ID).ok_or_else(|| missing("PatientID"))?;

        let role = match FileRole::from_modality(&modality) {
            FileRole::Other => get_string_value(dcm, SOP_CLASS_UID)
                .map(|uid| FileRole::from_sop_class(&uid))
                .unwrap_or(FileRole::Other),
            role => role,
        };
        let referenced = |seq| first_item(dcm, seq).and_then(|item| get_string_value(item, REFERENCED_SOP_INSTANCE_UID));

        Ok(Self {
            modified,
            role,
            patient_id,
            study_instance_uid,
            series_instance_uid: get_string_value(dcm, SERIES_INSTANCE_UID),
            sop_instance_uid,
            referenced_plan_uid: referenced(REFERENCED_RT_PLAN_SEQUENCE),
            referenced_structure_uid: referenced(REFERENCED_STRUCTURE_SET_SEQUENCE),
            summation_type: get_string_value(dcm, DOSE_SUMMATION_TYPE)
                .map(|s| DoseSummationType::from_str(&s)),
            path,
        })
    }

    /// Whether a dose covers its whole plan (PLAN or BRACHY)
    pub fn is_whole_plan_dose(&self) -> bool {
        self.summation_type
            .as_ref()
            .map(|t| t.is_whole_plan())
            .unwrap_or(false)
    }

    /// Checks if this file is preferred over another for the same object
    ///
    /// Priority order:
    /// 1. Later modification time
    /// 2. Lexically smaller path, so the choice is reproducible
    pub fn is_preferred_to(&self, other: &CandidateFile) -> bool {
        if self.modified != other.modified {
            // None sorts before Some, so a known time beats an unknown one
            return self.modified > other.modified;
        }
        self.path < other.path
    }
}

impl PartialEq for CandidateFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.modified == other.modified
    }
}

impl Eq for CandidateFile {}

impl PartialOrd for CandidateFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Preferred files sort first, so selection uses `.min()`
impl Ord for CandidateFile {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_preferred_to(other) {
            Ordering::Less
        } else if other.is_preferred_to(self) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Sniffs one file; see [`CandidateFile::from_file`]
pub fn sniff_file(path: &Path) -> Result<CandidateFile> {
    CandidateFile::from_file(path.to_path_buf())
}

/// Collects DICOM files under `directory`
///
/// Accepts `.dcm`/`.dicom` extensions (any case) and extensionless files
/// carrying the `DICM` magic. The result is sorted by path.
pub fn discover_files(directory: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![directory.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
                continue;
            }
            if !path.is_file() {
                continue;
            }
            match path.extension() {
                Some(ext) if ext.eq_ignore_ascii_case("dcm") || ext.eq_ignore_ascii_case("dicom") => {
                    files.push(path)
                }
                Some(_) => {}
                None => {
                    if is_dicom_file(&path) {
                        debug!("Found headerless DICOM file: {}", path.display());
                        files.push(path);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Checks for the `DICM` magic after the 128-byte preamble
pub fn is_dicom_file(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buffer = [0u8; 132];
    match file.read_exact(&mut buffer) {
        Ok(()) => &buffer[128..132] == b"DICM",
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Candidate with the given identifiers and modification second
    pub fn candidate(path: &str, role: FileRole, study: &str, series: &str, sop: &str, modified: i64) -> CandidateFile {
        CandidateFile {
            path: PathBuf::from(path),
            modified: DateTime::<Utc>::from_timestamp(modified, 0),
            role,
            patient_id: "MRN001".to_string(),
            study_instance_uid: study.to_string(),
            series_instance_uid: Some(series.to_string()),
            sop_instance_uid: sop.to_string(),
            referenced_plan_uid: None,
            referenced_structure_uid: None,
            summation_type: (role == FileRole::Dose).then_some(DoseSummationType::Plan),
        }
    }
}
