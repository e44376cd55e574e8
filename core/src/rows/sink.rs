use crate::error::Result;
use crate::persist::replace_file;
use crate::roi_map::{remap_dvh_rows, RoiNameMap};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{DvhRow, PlanRow, StudyRows};

const PLANS_FILE: &str = "plans.jsonl";
const RXS_FILE: &str = "rxs.jsonl";
const BEAMS_FILE: &str = "beams.jsonl";
const DVHS_FILE: &str = "dvhs.jsonl";
const TABLES: [&str; 4] = [PLANS_FILE, RXS_FILE, BEAMS_FILE, DVHS_FILE];

/// Destination of imported rows
///
/// The pipeline calls a sink from a single thread only.
pub trait RowSink {
    fn write_study(&mut self, rows: StudyRows) -> Result<()>;

    /// Whether rows of this study would be written
    ///
    /// The pipeline does not process a study the sink refuses and reports
    /// it as already imported instead.
    fn accepts_study(&self, _study_instance_uid: &str) -> bool {
        true
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Rows that can be retargeted after the ROI map changes
pub trait RowStore {
    /// Re-resolves every stored DVHs row; returns the number changed
    fn remap(&mut self, map: &RoiNameMap) -> Result<usize>;
}

/// What a sink does with a study it already holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Keep the stored rows and drop the new ones
    #[default]
    Skip,
    /// Delete the stored rows of the study, then write the new ones
    Replace,
}

/// Keeps every study in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub studies: Vec<StudyRows>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dvhs(&self) -> impl Iterator<Item = &DvhRow> {
        self.studies.iter().flat_map(|s| s.dvhs.iter())
    }
}

impl RowSink for MemorySink {
    fn write_study(&mut self, rows: StudyRows) -> Result<()> {
        if !self.accepts_study(&rows.plan.study_instance_uid) {
            warn!("Study {} already held, dropping its rows", rows.plan.study_instance_uid);
            return Ok(());
        }
        self.studies.push(rows);
        Ok(())
    }

    fn accepts_study(&self, study_instance_uid: &str) -> bool {
        !self
            .studies
            .iter()
            .any(|s| s.plan.study_instance_uid == study_instance_uid)
    }
}

impl RowStore for MemorySink {
    fn remap(&mut self, map: &RoiNameMap) -> Result<usize> {
        Ok(self
            .studies
            .iter_mut()
            .map(|study| remap_dvh_rows(map, std::slice::from_ref(&study.plan), &mut study.dvhs))
            .sum())
    }
}

struct Writers {
    plans: BufWriter<File>,
    rxs: BufWriter<File>,
    beams: BufWriter<File>,
    dvhs: BufWriter<File>,
}

impl Writers {
    fn open(directory: &Path) -> Result<Self> {
        Ok(Self {
            plans: open_append(&directory.join(PLANS_FILE))?,
            rxs: open_append(&directory.join(RXS_FILE))?,
            beams: open_append(&directory.join(BEAMS_FILE))?,
            dvhs: open_append(&directory.join(DVHS_FILE))?,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.plans.flush()?;
        self.rxs.flush()?;
        self.beams.flush()?;
        self.dvhs.flush()?;
        Ok(())
    }
}

/// Appends each table as JSON lines to a file in `directory`
///
/// Files are `plans.jsonl`, `rxs.jsonl`, `beams.jsonl` and `dvhs.jsonl`;
/// existing rows are kept and new ones appended. A study is identified by
/// its `study_instance_uid`; what happens to a study already in the tables
/// is decided by the [`DuplicatePolicy`].
pub struct JsonLinesSink {
    directory: PathBuf,
    writers: Writers,
    policy: DuplicatePolicy,
    /// Study UIDs present in `plans.jsonl`
    stored: BTreeSet<String>,
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn write_rows<T: Serialize>(writer: &mut BufWriter<File>, rows: &[T]) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *writer, row)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Reads one JSON-lines table, skipping blank lines
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

/// Row identity shared by the four tables
#[derive(Deserialize)]
struct StudyKey {
    study_instance_uid: String,
}

impl JsonLinesSink {
    /// Opens (creating if needed) the output directory
    ///
    /// Studies already in `plans.jsonl` are skipped; see
    /// [`JsonLinesSink::with_policy`].
    pub fn new(directory: &Path) -> Result<Self> {
        fs::create_dir_all(directory)?;
        let writers = Writers::open(directory)?;
        let stored: BTreeSet<String> = read_json_lines::<StudyKey>(&directory.join(PLANS_FILE))?
            .into_iter()
            .map(|key| key.study_instance_uid)
            .collect();
        debug!("{} studies already stored in {}", stored.len(), directory.display());
        Ok(Self {
            directory: directory.to_path_buf(),
            writers,
            policy: DuplicatePolicy::default(),
            stored,
        })
    }

    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn read_plans(&self) -> Result<Vec<PlanRow>> {
        read_json_lines(&self.directory.join(PLANS_FILE))
    }

    pub fn read_dvhs(&self) -> Result<Vec<DvhRow>> {
        read_json_lines(&self.directory.join(DVHS_FILE))
    }

    /// Rewrites every table without the rows of one study
    ///
    /// Kept lines are written back verbatim; only their study identity is
    /// parsed. Returns the number of rows deleted.
    fn delete_study(&mut self, study_instance_uid: &str) -> Result<usize> {
        self.writers.flush()?;
        let mut deleted = 0;
        for table in TABLES {
            let path = self.directory.join(table);
            if !path.exists() {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let mut kept: Vec<&str> = Vec::new();
            let mut removed = 0;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let key: StudyKey = serde_json::from_str(line)?;
                if key.study_instance_uid == study_instance_uid {
                    removed += 1;
                } else {
                    kept.push(line);
                }
            }
            if removed == 0 {
                continue;
            }
            replace_file(&path, |writer| {
                for line in &kept {
                    writer.write_all(line.as_bytes())?;
                    writer.write_all(b"\n")?;
                }
                Ok(())
            })?;
            deleted += removed;
        }
        // the old handles point at the replaced files
        self.writers = Writers::open(&self.directory)?;
        self.stored.remove(study_instance_uid);
        Ok(deleted)
    }
}

impl RowSink for JsonLinesSink {
    fn write_study(&mut self, rows: StudyRows) -> Result<()> {
        let uid = rows.plan.study_instance_uid.clone();
        if self.stored.contains(&uid) {
            match self.policy {
                DuplicatePolicy::Skip => {
                    warn!("Study {} already stored in {}, skipping", uid, self.directory.display());
                    return Ok(());
                }
                DuplicatePolicy::Replace => {
                    let deleted = self.delete_study(&uid)?;
                    info!("Replacing study {} ({} stored rows deleted)", uid, deleted);
                }
            }
        }

        write_rows(&mut self.writers.plans, std::slice::from_ref(&rows.plan))?;
        write_rows(&mut self.writers.rxs, &rows.rxs)?;
        write_rows(&mut self.writers.beams, &rows.beams)?;
        write_rows(&mut self.writers.dvhs, &rows.dvhs)?;
        debug!("Wrote {} DVH rows for study {}", rows.dvhs.len(), uid);
        self.stored.insert(uid);
        Ok(())
    }

    fn accepts_study(&self, study_instance_uid: &str) -> bool {
        self.policy == DuplicatePolicy::Replace || !self.stored.contains(study_instance_uid)
    }

    fn flush(&mut self) -> Result<()> {
        self.writers.flush()
    }
}

impl RowStore for JsonLinesSink {
    /// Rewrites `dvhs.jsonl` through a temp file and rename
    fn remap(&mut self, map: &RoiNameMap) -> Result<usize> {
        self.flush()?;
        let plans = self.read_plans()?;
        let mut dvhs = self.read_dvhs()?;
        let changed = remap_dvh_rows(map, &plans, &mut dvhs);
        if changed == 0 {
            return Ok(0);
        }

        let path = self.directory.join(DVHS_FILE);
        replace_file(&path, |writer| write_rows(writer, &dvhs))?;
        // the old handle points at the replaced file
        self.writers.dvhs = open_append(&path)?;
        info!("Remapped {} DVH rows in {}", changed, path.display());
        Ok(changed)
    }
}
