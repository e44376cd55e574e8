use crate::pipeline::{ImportReport, StudyOutcome};
use std::fmt;

/// Text report formatter for an import run
pub struct TextReport<'a> {
    report: &'a ImportReport,
}

impl<'a> TextReport<'a> {
    /// Creates a new text report
    pub fn new(report: &'a ImportReport) -> Self {
        Self { report }
    }
}

impl<'a> fmt::Display for TextReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "Import Report")?;
        writeln!(f, "=============")?;
        writeln!(f)?;
        writeln!(f, "Files Found:    {}", report.files_found)?;
        writeln!(f, "Files Skipped:  {}", report.skipped.len())?;
        writeln!(f, "Files Ignored:  {}", report.ignored)?;
        writeln!(f, "Imported:       {}", report.imported())?;
        writeln!(f, "Failed:         {}", report.failed())?;
        if report.already_imported() > 0 {
            writeln!(f, "Already Stored: {}", report.already_imported())?;
        }
        writeln!(f, "Warnings:       {}", report.warning_count())?;
        writeln!(f, "Names to Review: {}", report.reviews.len())?;
        if report.cancelled {
            writeln!(f, "Cancelled:      true")?;
        }

        if !report.outcomes.is_empty() {
            writeln!(f)?;
            writeln!(f, "Studies")?;
            writeln!(f, "-------")?;
            for outcome in &report.outcomes {
                match outcome {
                    StudyOutcome::Imported {
                        patient_id,
                        study_instance_uid,
                        plans,
                        rois,
                        dose_available,
                        warnings,
                    } => {
                        writeln!(
                            f,
                            "[ok]     {} {}: {} plan(s), {} ROI(s){}",
                            patient_id,
                            study_instance_uid,
                            plans,
                            rois,
                            if *dose_available { "" } else { ", no dose" }
                        )?;
                        for warning in warnings {
                            match &warning.roi {
                                Some(roi) => writeln!(f, "         ! {}: {}", roi, warning.error)?,
                                None => writeln!(f, "         ! {}", warning.error)?,
                            }
                        }
                    }
                    StudyOutcome::Failed {
                        patient_id,
                        study_instance_uid,
                        error,
                    } => {
                        writeln!(
                            f,
                            "[failed] {} {}: {}",
                            patient_id.as_deref().unwrap_or("unknown"),
                            study_instance_uid,
                            error
                        )?;
                    }
                    StudyOutcome::AlreadyImported {
                        patient_id,
                        study_instance_uid,
                    } => {
                        writeln!(f, "[stored] {} {}: already imported", patient_id, study_instance_uid)?;
                    }
                }
            }
        }

        if !report.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped Files")?;
            writeln!(f, "-------------")?;
            for skipped in &report.skipped {
                writeln!(f, "{}: {}", skipped.path.display(), skipped.error)?;
            }
        }

        if !report.reviews.is_empty() {
            writeln!(f)?;
            writeln!(f, "Names to Review")?;
            writeln!(f, "---------------")?;
            for review in &report.reviews {
                let suggestions: Vec<String> = review
                    .suggestions
                    .iter()
                    .map(|s| format!("{} ({:.2})", s.physician_roi, s.score))
                    .collect();
                writeln!(
                    f,
                    "{} / {}: {}",
                    review.physician,
                    review.roi_name,
                    if suggestions.is_empty() {
                        "no suggestions".to_string()
                    } else {
                        suggestions.join(", ")
                    }
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DvhcatError;
    use crate::pipeline::{NameReview, SkippedFile, StudyWarning};
    use crate::roi_map::Suggestion;
    use std::path::PathBuf;

    #[test]
    fn test_text_report_format() {
        let report = ImportReport {
            files_found: 5,
            skipped: vec![SkippedFile {
                path: PathBuf::from("bad.dcm"),
                error: DvhcatError::Parse("not DICOM".to_string()),
            }],
            ignored: 0,
            outcomes: vec![
                StudyOutcome::Imported {
                    patient_id: "MRN001".to_string(),
                    study_instance_uid: "9.9".to_string(),
                    plans: 2,
                    rois: 3,
                    dose_available: false,
                    warnings: vec![StudyWarning::study(DvhcatError::GridMismatch("origin".to_string()))],
                },
                StudyOutcome::Failed {
                    patient_id: None,
                    study_instance_uid: "8.8".to_string(),
                    error: DvhcatError::Association("no RT Structure Set".to_string()),
                },
                StudyOutcome::AlreadyImported {
                    patient_id: "MRN002".to_string(),
                    study_instance_uid: "7.7".to_string(),
                },
            ],
            reviews: vec![NameReview {
                patient_id: "MRN001".to_string(),
                study_instance_uid: "9.9".to_string(),
                physician: "DR._A".to_string(),
                roi_name: "lung lt".to_string(),
                suggestions: vec![Suggestion {
                    physician_roi: "lung left".to_string(),
                    institutional_roi: "Lung_L".to_string(),
                    variation: "lung left".to_string(),
                    score: 0.84,
                }],
            }],
            cancelled: false,
        };

        let output = format!("{}", TextReport::new(&report));

        assert!(output.contains("Import Report"));
        assert!(output.contains("Files Found:    5"));
        assert!(output.contains("Imported:       1"));
        assert!(output.contains("Failed:         1"));
        assert!(output.contains("Already Stored: 1"));
        assert!(output.contains("[stored] MRN002 7.7: already imported"));
        assert!(output.contains("[ok]     MRN001 9.9: 2 plan(s), 3 ROI(s), no dose"));
        assert!(output.contains("! Grid mismatch: origin"));
        assert!(output.contains("[failed] unknown 8.8: Association error: no RT Structure Set"));
        assert!(output.contains("bad.dcm: Parse error: not DICOM"));
        assert!(output.contains("DR._A / lung lt: lung left (0.84)"));
        assert!(!output.contains("Cancelled"));
    }
}
