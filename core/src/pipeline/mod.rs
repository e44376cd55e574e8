//! Import orchestration
//!
//! [`ImportPipeline`] sniffs files, associates them into study groups and
//! processes the groups on a rayon pool. Finished studies travel over a
//! channel back to the calling thread, which is the only writer of the
//! [`RowSink`]; rows are written in manifest order regardless of which
//! study finishes first.

mod report;
mod study;

pub use report::{ImportReport, NameReview, SkippedFile, StudyOutcome, StudyWarning};
pub use study::{process_study, StudyRecords, StudyResult};

use crate::association::{associate, sniff_file, CandidateFile, Manifest, StudyGroup};
use crate::cancel::CancellationToken;
use crate::complexity::ControlPointScorer;
use crate::error::{DvhcatError, Result};
use crate::roi_map::RoiNameMap;
use crate::rows::RowSink;
use crate::types::ImportConfig;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// Study-parallel importer holding an immutable ROI map snapshot
pub struct ImportPipeline {
    config: ImportConfig,
    roi_map: Arc<RoiNameMap>,
    scorer: Arc<dyn ControlPointScorer>,
    pool: rayon::ThreadPool,
}

impl ImportPipeline {
    /// Validates `config` and builds a worker pool of `config.concurrency` threads
    pub fn new(config: ImportConfig, roi_map: RoiNameMap, scorer: Arc<dyn ControlPointScorer>) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .thread_name(|i| format!("dvhcat-worker-{}", i))
            .build()
            .map_err(|e| DvhcatError::Config(format!("cannot start worker pool: {}", e)))?;
        Ok(Self {
            config,
            roi_map: Arc::new(roi_map),
            scorer,
            pool,
        })
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn roi_map(&self) -> &RoiNameMap {
        &self.roi_map
    }

    /// Sniffs, associates and imports the given files
    ///
    /// Files that fail to parse are listed in [`ImportReport::skipped`].
    pub fn run_paths(
        &self,
        paths: &[PathBuf],
        sink: &mut dyn RowSink,
        cancel: &CancellationToken,
    ) -> Result<ImportReport> {
        let sniffed: Vec<(PathBuf, Result<CandidateFile>)> = self
            .pool
            .install(|| paths.par_iter().map(|path| (path.clone(), sniff_file(path))).collect());

        let mut skipped = Vec::new();
        let mut candidates = Vec::with_capacity(sniffed.len());
        for (path, result) in sniffed {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    skipped.push(SkippedFile { path, error: e });
                }
            }
        }

        let mut report = self.run(candidates, sink, cancel)?;
        report.files_found = paths.len();
        report.skipped = skipped;
        Ok(report)
    }

    /// Associates sniffed candidates and imports every resolvable study
    pub fn run(
        &self,
        candidates: Vec<CandidateFile>,
        sink: &mut dyn RowSink,
        cancel: &CancellationToken,
    ) -> Result<ImportReport> {
        let files_found = candidates.len();
        let mut report = self.run_manifest(associate(candidates), sink, cancel)?;
        report.files_found = files_found;
        Ok(report)
    }

    /// Imports the study groups of an associated manifest
    ///
    /// Association failures become failed outcomes up front, and studies the
    /// sink already holds are reported without being processed. A study that
    /// fails to load or whose rows cannot be written fails on its own; the
    /// other studies continue. Only a failing final flush aborts the run.
    pub fn run_manifest(
        &self,
        manifest: Manifest,
        sink: &mut dyn RowSink,
        cancel: &CancellationToken,
    ) -> Result<ImportReport> {
        let mut report = ImportReport {
            ignored: manifest.ignored.len(),
            ..Default::default()
        };
        for failure in manifest.failures {
            warn!("Study {}: {}", failure.study_instance_uid, failure.error);
            report.outcomes.push(StudyOutcome::Failed {
                patient_id: failure.patient_id,
                study_instance_uid: failure.study_instance_uid,
                error: failure.error,
            });
        }

        let (groups, stored): (Vec<StudyGroup>, Vec<StudyGroup>) = manifest
            .groups
            .into_iter()
            .partition(|group| sink.accepts_study(&group.study_instance_uid));
        for group in stored {
            info!("Study {} already imported, skipping", group.study_instance_uid);
            report.outcomes.push(StudyOutcome::AlreadyImported {
                patient_id: group.patient_id,
                study_instance_uid: group.study_instance_uid,
            });
        }

        info!("Importing {} studies", groups.len());
        let (tx, rx) = mpsc::channel::<(usize, Result<StudyResult>)>();

        self.pool.in_place_scope(|scope| {
            for (index, group) in groups.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = self.import_group(group, cancel);
                    // the receiver only hangs up after every sender is gone
                    let _ = tx.send((index, result));
                });
            }
            drop(tx);

            let mut pending: BTreeMap<usize, Result<StudyResult>> = BTreeMap::new();
            let mut next = 0;
            for (index, result) in rx {
                pending.insert(index, result);
                while let Some(result) = pending.remove(&next) {
                    self.record(&groups[next], result, sink, &mut report);
                    next += 1;
                }
            }
        });

        sink.flush()?;
        if cancel.is_cancelled() {
            report.cancelled = true;
        }
        info!(
            "Imported {} of {} studies ({} warnings, {} names to review){}",
            report.imported(),
            report.outcomes.len(),
            report.warning_count(),
            report.reviews.len(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        Ok(report)
    }

    fn import_group(&self, group: &StudyGroup, cancel: &CancellationToken) -> Result<StudyResult> {
        cancel.check()?;
        debug!(
            "Loading study {} ({} plans)",
            group.study_instance_uid,
            group.plans.len()
        );
        let records = StudyRecords::load(group)?;
        process_study(&records, &self.config, &self.roi_map, self.scorer.as_ref(), cancel)
    }

    fn record(
        &self,
        group: &StudyGroup,
        result: Result<StudyResult>,
        sink: &mut dyn RowSink,
        report: &mut ImportReport,
    ) {
        let failed = |error: DvhcatError| StudyOutcome::Failed {
            patient_id: Some(group.patient_id.clone()),
            study_instance_uid: group.study_instance_uid.clone(),
            error,
        };
        match result {
            Ok(StudyResult {
                rows,
                warnings,
                reviews,
                dose_available,
            }) => {
                let rois = rows.dvhs.len();
                match sink.write_study(rows) {
                    Ok(()) => {
                        report.outcomes.push(StudyOutcome::Imported {
                            patient_id: group.patient_id.clone(),
                            study_instance_uid: group.study_instance_uid.clone(),
                            plans: group.plans.len(),
                            rois,
                            dose_available,
                            warnings,
                        });
                        report.reviews.extend(reviews);
                    }
                    Err(e) => {
                        warn!("Study {}: cannot write rows: {}", group.study_instance_uid, e);
                        report.outcomes.push(failed(e));
                    }
                }
            }
            Err(DvhcatError::Cancelled) => {
                debug!("Study {} cancelled", group.study_instance_uid);
                report.cancelled = true;
            }
            Err(e) => {
                warn!("Study {}: {}", group.study_instance_uid, e);
                report.outcomes.push(failed(e));
            }
        }
    }

    /// Runs [`ImportPipeline::run_paths`] on a dedicated thread
    ///
    /// The sink moves to the import thread and comes back from
    /// [`ImportHandle::join`].
    pub fn spawn<S>(self, paths: Vec<PathBuf>, mut sink: S) -> ImportHandle<S>
    where
        S: RowSink + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = std::thread::spawn(move || {
            let report = self.run_paths(&paths, &mut sink, &token);
            (report, sink)
        });
        ImportHandle { cancel, thread }
    }
}

/// A running import started with [`ImportPipeline::spawn`]
pub struct ImportHandle<S> {
    cancel: CancellationToken,
    thread: JoinHandle<(Result<ImportReport>, S)>,
}

impl<S> ImportHandle<S> {
    /// Asks every worker to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the import and returns its report together with the sink
    ///
    /// A panic on the import thread is resumed on the caller.
    pub fn join(self) -> (Result<ImportReport>, S) {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complexity::ApertureScorer;
    use crate::extraction::dose::fixtures::dose_object;
    use crate::extraction::plan::fixtures::{simple_plan, text};
    use crate::extraction::structure::fixtures::{square_roi, structure_set};
    use crate::extraction::{DoseRecord, PlanRecord, StructureSetRecord, STUDY_INSTANCE_UID};
    use crate::rows::{DuplicatePolicy, JsonLinesSink, MemorySink};
    use crate::types::{RT_DOSE_STORAGE, RT_PLAN_STORAGE, RT_STRUCTURE_SET_STORAGE};
    use dicom_dictionary_std::uids;
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
    use std::path::Path;
    use tempfile::TempDir;

    // x -20..40, y -20..20, z -5..5 mm
    const ORIGIN: [f64; 3] = [-20.0, -20.0, -5.0];
    const SHAPE: (usize, usize, usize) = (5, 17, 25);

    fn uniform_dose(sop: &str, plan_uid: &str, origin: [f64; 3], cgy: u32) -> InMemDicomObject {
        let (frames, rows, columns) = SHAPE;
        dose_object(sop, plan_uid, origin, SHAPE, vec![cgy; frames * rows * columns], 0.01)
    }

    fn structures(study: &str) -> InMemDicomObject {
        structure_set(
            "2.2.2",
            study,
            vec![
                square_roi(1, "PTV", "PTV", 0.0, 0.0, 10.0, &[-2.5, 0.0, 2.5]),
                square_roi(2, "Lung_L", "ORGAN", 30.0, 0.0, 10.0, &[-5.0, -2.5, 0.0, 2.5, 5.0]),
            ],
        )
    }

    fn ptv_map() -> RoiNameMap {
        let mut map = RoiNameMap::new();
        map.add_institutional("PTV").unwrap();
        map
    }

    fn pipeline() -> ImportPipeline {
        let config = ImportConfig::default().with_concurrency(2);
        ImportPipeline::new(config, ptv_map(), Arc::new(ApertureScorer::default())).unwrap()
    }

    fn records(doses: &[(&str, &str, [f64; 3])]) -> StudyRecords {
        let plans = doses
            .iter()
            .map(|(_, plan_uid, _)| {
                let dcm = simple_plan(plan_uid, "9.9", "9.9.1", 5000.0, 25);
                PlanRecord::from_dicom(PathBuf::from("plan.dcm"), &dcm).unwrap()
            })
            .collect();
        let doses = doses
            .iter()
            .map(|(sop, plan_uid, origin)| {
                DoseRecord::from_dicom(PathBuf::from("dose.dcm"), &uniform_dose(sop, plan_uid, *origin, 100)).unwrap()
            })
            .collect();
        let structure = StructureSetRecord::from_dicom(PathBuf::from("rs.dcm"), &structures("9.9")).unwrap();
        StudyRecords::new(plans, doses, structure)
    }

    #[test]
    fn test_process_study_fills_every_table() {
        let records = records(&[("3.3", "1.1.1", ORIGIN)]);
        let config = ImportConfig::default();
        let result = process_study(
            &records,
            &config,
            &ptv_map(),
            &ApertureScorer::default(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(result.dose_available);
        assert!(result.warnings.is_empty());
        assert_eq!(result.rows.plan.fxs, 25);
        assert_eq!(result.rows.rxs.len(), 1);
        assert_eq!(result.rows.beams.len(), 1);
        assert_eq!(result.rows.dvhs.len(), 2);

        let ptv = &result.rows.dvhs[0];
        assert_eq!(ptv.institutional_roi, "PTV");
        assert!((ptv.mean_dose.unwrap() - 1.0).abs() < 1e-6);
        assert!((ptv.max_dose.unwrap() - 1.0).abs() < 1e-6);
        assert!(ptv.dth_string.is_none());

        let lung = &result.rows.dvhs[1];
        assert_eq!(lung.institutional_roi, crate::roi_map::UNCATEGORIZED);
        assert!(lung.dth_string.is_some());
        assert!(lung.dist_to_ptv_min.unwrap() > 0.0);
        let dvh: Vec<f64> = lung
            .dvh_string
            .as_deref()
            .unwrap()
            .split(',')
            .map(|v| v.parse().unwrap())
            .collect();
        assert!(dvh.windows(2).all(|w| w[0] >= w[1]));

        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.reviews[0].roi_name, "Lung_L");
        assert_eq!(result.reviews[0].physician, "DR._A");
    }

    #[test]
    fn test_mismatched_grids_leave_dose_fields_empty() {
        let records = records(&[("3.3", "1.1.1", ORIGIN), ("3.4", "1.1.2", [-17.5, -20.0, -5.0])]);
        let result = process_study(
            &records,
            &ImportConfig::default(),
            &ptv_map(),
            &ApertureScorer::default(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(!result.dose_available);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].roi.is_none());
        assert!(matches!(result.warnings[0].error, DvhcatError::GridMismatch(_)));
        for row in &result.rows.dvhs {
            assert!(row.mean_dose.is_none());
            assert!(row.dvh_string.is_none());
            assert!(row.volume.is_some());
        }
        assert_eq!(result.rows.plan.fxs, 50);
    }

    #[test]
    fn test_cancelled_study_stops() {
        let records = records(&[("3.3", "1.1.1", ORIGIN)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = process_study(
            &records,
            &ImportConfig::default(),
            &ptv_map(),
            &ApertureScorer::default(),
            &cancel,
        );
        assert!(matches!(result, Err(DvhcatError::Cancelled)));
    }

    fn write(dcm: InMemDicomObject, path: &Path, sop_class: &str, sop: &str) {
        dcm.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sop),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
    }

    /// One complete study, one plan without dose or structures, one unreadable file
    fn write_inbox(dir: &Path) -> Vec<PathBuf> {
        write(simple_plan("1.1.1", "9.9", "9.9.1", 5000.0, 25), &dir.join("plan.dcm"), RT_PLAN_STORAGE, "1.1.1");
        write(uniform_dose("3.3", "1.1.1", ORIGIN, 100), &dir.join("dose.dcm"), RT_DOSE_STORAGE, "3.3");
        write(structures("9.9"), &dir.join("rs.dcm"), RT_STRUCTURE_SET_STORAGE, "2.2.2");

        let orphan = simple_plan("1.1.9", "8.8", "8.8.1", 6000.0, 30);
        write(orphan, &dir.join("orphan.dcm"), RT_PLAN_STORAGE, "1.1.9");

        std::fs::write(dir.join("bad.dcm"), b"not dicom").unwrap();
        crate::association::discover_files(dir, false).unwrap()
    }

    #[test]
    fn test_run_paths_reports_every_file_and_study() {
        let dir = TempDir::new().unwrap();
        let paths = write_inbox(dir.path());
        let mut sink = MemorySink::new();

        let report = pipeline()
            .run_paths(&paths, &mut sink, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.files_found, 5);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("bad.dcm"));
        assert_eq!(report.imported(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.cancelled);
        assert_eq!(report.reviews.len(), 1);

        assert_eq!(sink.studies.len(), 1);
        let study = &sink.studies[0];
        assert_eq!(study.plan.study_instance_uid, "9.9");
        assert_eq!(study.dvhs.len(), 2);
        assert!(study.dvhs.iter().all(|r| r.mean_dose.is_some()));
    }

    #[test]
    fn test_independent_series_import_as_separate_studies() {
        let dir = TempDir::new().unwrap();
        let dir = dir.path();
        write(simple_plan("1.1.1", "9.9", "9.9.1", 5000.0, 25), &dir.join("plan_a.dcm"), RT_PLAN_STORAGE, "1.1.1");
        write(simple_plan("1.1.2", "9.9", "9.9.7", 2000.0, 10), &dir.join("plan_b.dcm"), RT_PLAN_STORAGE, "1.1.2");
        write(uniform_dose("3.3", "1.1.1", ORIGIN, 100), &dir.join("dose_a.dcm"), RT_DOSE_STORAGE, "3.3");
        write(uniform_dose("3.4", "1.1.2", ORIGIN, 50), &dir.join("dose_b.dcm"), RT_DOSE_STORAGE, "3.4");
        write(structures("9.9"), &dir.join("rs.dcm"), RT_STRUCTURE_SET_STORAGE, "2.2.2");
        let paths = crate::association::discover_files(dir, false).unwrap();
        let mut sink = MemorySink::new();

        let report = pipeline()
            .run_paths(&paths, &mut sink, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.imported(), 2);
        assert_eq!(report.failed(), 0);
        let studies: Vec<&str> = sink.studies.iter().map(|s| s.plan.study_instance_uid.as_str()).collect();
        assert_eq!(studies, vec!["9.9", "9.9_2"]);

        let second = &sink.studies[1];
        assert_eq!(second.plan.fxs, 10);
        assert!(second.rxs.iter().all(|r| r.study_instance_uid == "9.9_2"));
        assert!(second.beams.iter().all(|r| r.study_instance_uid == "9.9_2"));
        assert!(second.dvhs.iter().all(|r| r.study_instance_uid == "9.9_2"));
        let mean = second.dvhs[0].mean_dose.unwrap();
        assert!((mean - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_second_run_skips_stored_studies() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir(&inbox).unwrap();
        let paths = write_inbox(&inbox);
        let out = dir.path().join("tables");

        let mut sink = JsonLinesSink::new(&out).unwrap();
        let first = pipeline().run_paths(&paths, &mut sink, &CancellationToken::new()).unwrap();
        assert_eq!(first.imported(), 1);
        drop(sink);

        let mut sink = JsonLinesSink::new(&out).unwrap();
        let second = pipeline().run_paths(&paths, &mut sink, &CancellationToken::new()).unwrap();
        assert_eq!(second.imported(), 0);
        assert_eq!(second.already_imported(), 1);
        assert_eq!(second.failed(), 1);
        assert!(second.reviews.is_empty());
        assert_eq!(sink.read_plans().unwrap().len(), 1);
        assert_eq!(sink.read_dvhs().unwrap().len(), 2);

        let mut sink = JsonLinesSink::new(&out).unwrap().with_policy(DuplicatePolicy::Replace);
        let third = pipeline().run_paths(&paths, &mut sink, &CancellationToken::new()).unwrap();
        assert_eq!(third.imported(), 1);
        assert_eq!(sink.read_plans().unwrap().len(), 1);
        assert_eq!(sink.read_dvhs().unwrap().len(), 2);
    }

    #[test]
    fn test_cancelled_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let paths = write_inbox(dir.path());
        let mut sink = MemorySink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline().run_paths(&paths, &mut sink, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.imported(), 0);
        assert!(sink.studies.is_empty());
    }

    #[test]
    fn test_spawned_import_returns_sink() {
        let dir = TempDir::new().unwrap();
        let paths = write_inbox(dir.path());

        let handle = pipeline().spawn(paths, MemorySink::new());
        let (report, sink) = handle.join();
        let report = report.unwrap();
        assert_eq!(report.imported(), 1);
        assert_eq!(sink.studies.len(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ImportConfig {
            dvh_bin_width_gy: 0.0,
            ..Default::default()
        };
        let result = ImportPipeline::new(config, RoiNameMap::new(), Arc::new(ApertureScorer::default()));
        assert!(matches!(result, Err(DvhcatError::Config(_))));
    }
}
