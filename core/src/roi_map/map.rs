use crate::error::{DvhcatError, Result};
use crate::types::RoiType;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::fuzzy::combined_score;
use super::name::{clean_name, clean_physician_name};

/// Physician whose physician ROIs are the institutional ROIs
pub const DEFAULT_PHYSICIAN: &str = "DEFAULT";

/// Institutional/physician ROI assigned to names nobody has mapped
pub const UNCATEGORIZED: &str = "uncategorized";

/// One physician ROI: its institutional link, type override and raw names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicianRoi {
    pub institutional_roi: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi_type: Option<RoiType>,
    pub variations: BTreeSet<String>,
}

impl PhysicianRoi {
    fn matches(&self, clean: &str) -> bool {
        self.variations.iter().any(|v| clean_name(v) == clean)
    }
}

/// Everything mapped for one physician
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicianRois {
    pub rois: BTreeMap<String, PhysicianRoi>,
    /// Raw names seen on import that no physician ROI claims
    #[serde(default)]
    pub uncategorized: BTreeSet<String>,
}

impl PhysicianRois {
    /// Physician ROI owning a cleaned name
    fn owner(&self, clean: &str) -> Option<(&String, &PhysicianRoi)> {
        self.rois.iter().find(|(_, roi)| roi.matches(clean))
    }
}

/// One recorded map edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MapEdit {
    AddInstitutional { name: String },
    RenameInstitutional { old: String, new: String },
    DeleteInstitutional { name: String },
    AddPhysician { physician: String },
    AddPhysicianRoi { physician: String, institutional_roi: String, physician_roi: String },
    RenamePhysicianRoi { physician: String, old: String, new: String },
    DeletePhysicianRoi { physician: String, physician_roi: String },
    AddVariation { physician: String, physician_roi: String, variation: String },
    RemoveVariation { physician: String, physician_roi: String, variation: String },
    Merge { physician: String, from: String, into: String },
    SetRoiType { physician: String, physician_roi: String, roi_type: Option<RoiType> },
    ConfirmSuggestion { physician: String, physician_roi: String, variation: String },
    RecordUncategorized { physician: String, name: String },
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Map version produced by the edit
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub edit: MapEdit,
}

/// Resolved names of a raw ROI name
#[derive(Debug, Clone, PartialEq)]
pub struct RoiMapping {
    pub physician: String,
    pub physician_roi: String,
    pub institutional_roi: String,
    pub roi_type: Option<RoiType>,
}

/// Candidate physician ROI for an unmapped name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub physician_roi: String,
    pub institutional_roi: String,
    /// Known variation that scored best
    pub variation: String,
    pub score: f64,
}

/// Outcome of resolving a raw ROI name
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Mapped(RoiMapping),
    Uncategorized { suggestions: Vec<Suggestion> },
}

impl Resolution {
    pub fn mapping(&self) -> Option<&RoiMapping> {
        match self {
            Resolution::Mapped(mapping) => Some(mapping),
            Resolution::Uncategorized { .. } => None,
        }
    }
}

/// Versioned institutional/physician ROI name map
///
/// Two levels: `institutional_roi → {physician → physician_roi}`, with the
/// raw-name variations attached to each physician ROI. A cleaned raw name
/// belongs to at most one physician ROI per physician. Every edit bumps
/// `version` and is appended to the audit trail.
///
/// The map also remembers the row stores imported against it, so that an
/// edit can retarget their stored DVHs rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiNameMap {
    version: u64,
    institutional_rois: BTreeSet<String>,
    physicians: BTreeMap<String, PhysicianRois>,
    #[serde(default)]
    audit: Vec<AuditEntry>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    row_stores: BTreeSet<PathBuf>,
}

impl Default for RoiNameMap {
    fn default() -> Self {
        let mut physicians = BTreeMap::new();
        physicians.insert(DEFAULT_PHYSICIAN.to_string(), PhysicianRois::default());
        Self {
            version: 0,
            institutional_rois: BTreeSet::new(),
            physicians,
            audit: Vec::new(),
            row_stores: BTreeSet::new(),
        }
    }
}

fn roi_map_error(msg: String) -> DvhcatError {
    DvhcatError::RoiMap(msg)
}

impl RoiNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn institutional_rois(&self) -> &BTreeSet<String> {
        &self.institutional_rois
    }

    pub fn physicians(&self) -> impl Iterator<Item = &String> {
        self.physicians.keys()
    }

    pub fn physician(&self, physician: &str) -> Option<&PhysicianRois> {
        self.physicians.get(&clean_physician_name(physician))
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Output directories whose rows follow this map
    pub fn row_stores(&self) -> &BTreeSet<PathBuf> {
        &self.row_stores
    }

    /// Remembers a row store; returns whether it was new
    ///
    /// Not a naming edit, so the version is left alone.
    pub fn register_row_store(&mut self, directory: &Path) -> bool {
        self.row_stores.insert(directory.to_path_buf())
    }

    /// Audit entries recorded after `version`
    pub fn edits_since(&self, version: u64) -> &[AuditEntry] {
        let start = self.audit.partition_point(|entry| entry.version <= version);
        &self.audit[start..]
    }

    /// Restores the `DEFAULT` physician after loading
    pub(crate) fn ensure_default(&mut self) {
        self.physicians
            .entry(DEFAULT_PHYSICIAN.to_string())
            .or_default();
    }

    /// Resolves a raw name by exact (cleaned) match only
    ///
    /// Looks at the physician's own variations first, then at `DEFAULT`.
    pub fn resolve_exact(&self, physician: &str, raw: &str) -> Option<RoiMapping> {
        let clean = clean_name(raw);
        let physician = clean_physician_name(physician);
        for p in [physician.as_str(), DEFAULT_PHYSICIAN] {
            let Some(rois) = self.physicians.get(p) else {
                continue;
            };
            if let Some((name, roi)) = rois.owner(&clean) {
                return Some(RoiMapping {
                    physician: p.to_string(),
                    physician_roi: name.clone(),
                    institutional_roi: roi.institutional_roi.clone(),
                    roi_type: roi.roi_type.clone(),
                });
            }
        }
        None
    }

    /// Resolves a raw name, offering ranked suggestions on a miss
    ///
    /// Suggestions scoring at least `threshold` are returned, best first and
    /// at most one per physician ROI. They are never applied automatically.
    pub fn resolve(&self, physician: &str, raw: &str, threshold: f64, max_suggestions: usize) -> Resolution {
        if let Some(mapping) = self.resolve_exact(physician, raw) {
            return Resolution::Mapped(mapping);
        }
        Resolution::Uncategorized {
            suggestions: self.suggest(physician, raw, threshold, max_suggestions),
        }
    }

    fn suggest(&self, physician: &str, raw: &str, threshold: f64, max: usize) -> Vec<Suggestion> {
        let physician = clean_physician_name(physician);
        let mut best: BTreeMap<(String, String), Suggestion> = BTreeMap::new();
        for p in [physician.as_str(), DEFAULT_PHYSICIAN] {
            let Some(rois) = self.physicians.get(p) else {
                continue;
            };
            for (name, roi) in &rois.rois {
                for variation in &roi.variations {
                    let score = combined_score(raw, variation);
                    if score < threshold {
                        continue;
                    }
                    let key = (p.to_string(), name.clone());
                    if best.get(&key).map_or(true, |s| score > s.score) {
                        best.insert(
                            key,
                            Suggestion {
                                physician_roi: name.clone(),
                                institutional_roi: roi.institutional_roi.clone(),
                                variation: variation.clone(),
                                score,
                            },
                        );
                    }
                }
            }
        }
        let mut suggestions: Vec<Suggestion> = best.into_values().collect();
        suggestions.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.physician_roi.cmp(&b.physician_roi))
        });
        suggestions.truncate(max);
        suggestions
    }

    pub fn add_institutional(&mut self, name: &str) -> Result<()> {
        self.apply(MapEdit::AddInstitutional { name: name.trim().to_string() })
    }

    pub fn rename_institutional(&mut self, old: &str, new: &str) -> Result<()> {
        self.apply(MapEdit::RenameInstitutional {
            old: old.trim().to_string(),
            new: new.trim().to_string(),
        })
    }

    pub fn delete_institutional(&mut self, name: &str) -> Result<()> {
        self.apply(MapEdit::DeleteInstitutional { name: name.trim().to_string() })
    }

    pub fn add_physician(&mut self, physician: &str) -> Result<()> {
        self.apply(MapEdit::AddPhysician { physician: clean_physician_name(physician) })
    }

    pub fn add_physician_roi(&mut self, physician: &str, institutional_roi: &str, physician_roi: &str) -> Result<()> {
        self.apply(MapEdit::AddPhysicianRoi {
            physician: clean_physician_name(physician),
            institutional_roi: institutional_roi.trim().to_string(),
            physician_roi: physician_roi.trim().to_string(),
        })
    }

    pub fn rename_physician_roi(&mut self, physician: &str, old: &str, new: &str) -> Result<()> {
        self.apply(MapEdit::RenamePhysicianRoi {
            physician: clean_physician_name(physician),
            old: old.trim().to_string(),
            new: new.trim().to_string(),
        })
    }

    pub fn delete_physician_roi(&mut self, physician: &str, physician_roi: &str) -> Result<()> {
        self.apply(MapEdit::DeletePhysicianRoi {
            physician: clean_physician_name(physician),
            physician_roi: physician_roi.trim().to_string(),
        })
    }

    pub fn add_variation(&mut self, physician: &str, physician_roi: &str, variation: &str) -> Result<()> {
        self.apply(MapEdit::AddVariation {
            physician: clean_physician_name(physician),
            physician_roi: physician_roi.trim().to_string(),
            variation: variation.trim().to_string(),
        })
    }

    pub fn remove_variation(&mut self, physician: &str, physician_roi: &str, variation: &str) -> Result<()> {
        self.apply(MapEdit::RemoveVariation {
            physician: clean_physician_name(physician),
            physician_roi: physician_roi.trim().to_string(),
            variation: variation.trim().to_string(),
        })
    }

    /// Moves every variation of `from` onto `into` and deletes `from`
    pub fn merge(&mut self, physician: &str, from: &str, into: &str) -> Result<()> {
        self.apply(MapEdit::Merge {
            physician: clean_physician_name(physician),
            from: from.trim().to_string(),
            into: into.trim().to_string(),
        })
    }

    pub fn set_roi_type(&mut self, physician: &str, physician_roi: &str, roi_type: Option<RoiType>) -> Result<()> {
        self.apply(MapEdit::SetRoiType {
            physician: clean_physician_name(physician),
            physician_roi: physician_roi.trim().to_string(),
            roi_type,
        })
    }

    /// Accepts a suggestion: the raw name becomes a variation of `physician_roi`
    pub fn confirm_suggestion(&mut self, physician: &str, physician_roi: &str, raw: &str) -> Result<()> {
        self.apply(MapEdit::ConfirmSuggestion {
            physician: clean_physician_name(physician),
            physician_roi: physician_roi.trim().to_string(),
            variation: raw.trim().to_string(),
        })
    }

    /// Holds an unmapped raw name for curation
    ///
    /// Creates the physician when unknown. Returns `false`, without a new
    /// version, when the name is already mapped or already held.
    pub fn record_uncategorized(&mut self, physician: &str, raw: &str) -> Result<bool> {
        let physician = clean_physician_name(physician);
        let raw = raw.trim().to_string();
        if raw.is_empty() || self.resolve_exact(&physician, &raw).is_some() {
            return Ok(false);
        }
        let clean = clean_name(&raw);
        let held = self
            .physicians
            .get(&physician)
            .map(|rois| rois.uncategorized.iter().any(|n| clean_name(n) == clean))
            .unwrap_or(false);
        if held {
            return Ok(false);
        }
        self.apply(MapEdit::RecordUncategorized { physician, name: raw })?;
        Ok(true)
    }

    /// Validates and applies one edit, then records it
    ///
    /// # Errors
    ///
    /// Returns `RoiMap` when the edit names something missing or would give
    /// a raw name two owners; the map is left unchanged.
    pub fn apply(&mut self, edit: MapEdit) -> Result<()> {
        self.apply_unrecorded(&edit)?;
        self.version += 1;
        debug!("ROI map v{}: {:?}", self.version, edit);
        self.audit.push(AuditEntry {
            version: self.version,
            timestamp: Utc::now(),
            edit,
        });
        Ok(())
    }

    fn rois_mut(&mut self, physician: &str) -> Result<&mut PhysicianRois> {
        self.physicians
            .get_mut(physician)
            .ok_or_else(|| roi_map_error(format!("unknown physician {}", physician)))
    }

    fn roi_mut<'a>(rois: &'a mut PhysicianRois, physician_roi: &str) -> Result<&'a mut PhysicianRoi> {
        rois.rois
            .get_mut(physician_roi)
            .ok_or_else(|| roi_map_error(format!("unknown physician ROI {}", physician_roi)))
    }

    /// Fails when `variation` already belongs to a physician ROI other than `owner`
    fn check_unclaimed(rois: &PhysicianRois, variation: &str, owner: &str) -> Result<()> {
        match rois.owner(&clean_name(variation)) {
            Some((name, _)) if name != owner => Err(roi_map_error(format!(
                "'{}' is already a variation of {}",
                variation, name
            ))),
            _ => Ok(()),
        }
    }

    fn apply_unrecorded(&mut self, edit: &MapEdit) -> Result<()> {
        match edit {
            MapEdit::AddInstitutional { name } => {
                if name.is_empty() || self.institutional_rois.contains(name) {
                    return Err(roi_map_error(format!("institutional ROI '{}' exists or is empty", name)));
                }
                let default = self.rois_mut(DEFAULT_PHYSICIAN)?;
                Self::check_unclaimed(default, name, name)?;
                default.rois.insert(
                    name.clone(),
                    PhysicianRoi {
                        institutional_roi: name.clone(),
                        roi_type: None,
                        variations: BTreeSet::from([name.clone()]),
                    },
                );
                default.uncategorized.retain(|n| clean_name(n) != clean_name(name));
                self.institutional_rois.insert(name.clone());
            }
            MapEdit::RenameInstitutional { old, new } => {
                if !self.institutional_rois.contains(old) {
                    return Err(roi_map_error(format!("unknown institutional ROI {}", old)));
                }
                if new.is_empty() || self.institutional_rois.contains(new) {
                    return Err(roi_map_error(format!("institutional ROI '{}' exists or is empty", new)));
                }
                let default = self.rois_mut(DEFAULT_PHYSICIAN)?;
                Self::check_unclaimed(default, new, old)?;
                if let Some(mut roi) = default.rois.remove(old) {
                    roi.variations.insert(new.clone());
                    default.rois.insert(new.clone(), roi);
                }
                for rois in self.physicians.values_mut() {
                    for roi in rois.rois.values_mut() {
                        if roi.institutional_roi == *old {
                            roi.institutional_roi = new.clone();
                        }
                    }
                }
                self.institutional_rois.remove(old);
                self.institutional_rois.insert(new.clone());
            }
            MapEdit::DeleteInstitutional { name } => {
                if !self.institutional_rois.remove(name) {
                    return Err(roi_map_error(format!("unknown institutional ROI {}", name)));
                }
                let default = self.rois_mut(DEFAULT_PHYSICIAN)?;
                if let Some(roi) = default.rois.remove(name) {
                    default.uncategorized.extend(roi.variations);
                }
                for rois in self.physicians.values_mut() {
                    for roi in rois.rois.values_mut() {
                        if roi.institutional_roi == *name {
                            roi.institutional_roi = UNCATEGORIZED.to_string();
                        }
                    }
                }
            }
            MapEdit::AddPhysician { physician } => {
                if physician.is_empty() || self.physicians.contains_key(physician) {
                    return Err(roi_map_error(format!("physician '{}' exists or is empty", physician)));
                }
                self.physicians.insert(physician.clone(), PhysicianRois::default());
            }
            MapEdit::AddPhysicianRoi {
                physician,
                institutional_roi,
                physician_roi,
            } => {
                if physician == DEFAULT_PHYSICIAN {
                    return Err(roi_map_error(
                        "DEFAULT physician ROIs are managed as institutional ROIs".to_string(),
                    ));
                }
                if institutional_roi != UNCATEGORIZED && !self.institutional_rois.contains(institutional_roi) {
                    return Err(roi_map_error(format!("unknown institutional ROI {}", institutional_roi)));
                }
                let rois = self.rois_mut(physician)?;
                if physician_roi.is_empty() || rois.rois.contains_key(physician_roi) {
                    return Err(roi_map_error(format!("physician ROI '{}' exists or is empty", physician_roi)));
                }
                Self::check_unclaimed(rois, physician_roi, physician_roi)?;
                rois.rois.insert(
                    physician_roi.clone(),
                    PhysicianRoi {
                        institutional_roi: institutional_roi.clone(),
                        roi_type: None,
                        variations: BTreeSet::from([physician_roi.clone()]),
                    },
                );
                let clean = clean_name(physician_roi);
                rois.uncategorized.retain(|n| clean_name(n) != clean);
            }
            MapEdit::RenamePhysicianRoi { physician, old, new } => {
                if physician == DEFAULT_PHYSICIAN {
                    return Err(roi_map_error(
                        "rename DEFAULT physician ROIs as institutional ROIs".to_string(),
                    ));
                }
                let rois = self.rois_mut(physician)?;
                if new.is_empty() || rois.rois.contains_key(new) {
                    return Err(roi_map_error(format!("physician ROI '{}' exists or is empty", new)));
                }
                Self::check_unclaimed(rois, new, old)?;
                let mut roi = rois
                    .rois
                    .remove(old)
                    .ok_or_else(|| roi_map_error(format!("unknown physician ROI {}", old)))?;
                roi.variations.insert(new.clone());
                rois.rois.insert(new.clone(), roi);
            }
            MapEdit::DeletePhysicianRoi { physician, physician_roi } => {
                if physician == DEFAULT_PHYSICIAN {
                    return Err(roi_map_error(
                        "delete DEFAULT physician ROIs as institutional ROIs".to_string(),
                    ));
                }
                let rois = self.rois_mut(physician)?;
                let roi = rois
                    .rois
                    .remove(physician_roi)
                    .ok_or_else(|| roi_map_error(format!("unknown physician ROI {}", physician_roi)))?;
                rois.uncategorized.extend(roi.variations);
            }
            MapEdit::AddVariation {
                physician,
                physician_roi,
                variation,
            }
            | MapEdit::ConfirmSuggestion {
                physician,
                physician_roi,
                variation,
            } => {
                if variation.is_empty() {
                    return Err(roi_map_error("empty variation".to_string()));
                }
                let rois = self.rois_mut(physician)?;
                Self::check_unclaimed(rois, variation, physician_roi)?;
                let roi = Self::roi_mut(rois, physician_roi)?;
                roi.variations.insert(variation.clone());
                let clean = clean_name(variation);
                rois.uncategorized.retain(|n| clean_name(n) != clean);
            }
            MapEdit::RemoveVariation {
                physician,
                physician_roi,
                variation,
            } => {
                if clean_name(variation) == clean_name(physician_roi) {
                    return Err(roi_map_error(format!(
                        "'{}' names the physician ROI itself",
                        variation
                    )));
                }
                let rois = self.rois_mut(physician)?;
                let roi = Self::roi_mut(rois, physician_roi)?;
                let before = roi.variations.len();
                let clean = clean_name(variation);
                roi.variations.retain(|v| clean_name(v) != clean);
                if roi.variations.len() == before {
                    return Err(roi_map_error(format!(
                        "'{}' is not a variation of {}",
                        variation, physician_roi
                    )));
                }
                rois.uncategorized.insert(variation.clone());
            }
            MapEdit::Merge { physician, from, into } => {
                if physician == DEFAULT_PHYSICIAN {
                    return Err(roi_map_error(
                        "DEFAULT physician ROIs cannot be merged".to_string(),
                    ));
                }
                if from == into {
                    return Err(roi_map_error(format!("cannot merge {} into itself", from)));
                }
                let rois = self.rois_mut(physician)?;
                if !rois.rois.contains_key(into) {
                    return Err(roi_map_error(format!("unknown physician ROI {}", into)));
                }
                let merged = rois
                    .rois
                    .remove(from)
                    .ok_or_else(|| roi_map_error(format!("unknown physician ROI {}", from)))?;
                let target = Self::roi_mut(rois, into)?;
                target.variations.extend(merged.variations);
            }
            MapEdit::SetRoiType {
                physician,
                physician_roi,
                roi_type,
            } => {
                let rois = self.rois_mut(physician)?;
                Self::roi_mut(rois, physician_roi)?.roi_type = roi_type.clone();
            }
            MapEdit::RecordUncategorized { physician, name } => {
                self.physicians
                    .entry(physician.clone())
                    .or_default()
                    .uncategorized
                    .insert(name.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// PTV and Lung_L institutional ROIs; DR._A maps "PTV_6000" and "lung left"
    pub fn sample_map() -> RoiNameMap {
        let mut map = RoiNameMap::new();
        map.add_institutional("PTV").unwrap();
        map.add_institutional("Lung_L").unwrap();
        map.add_physician("Dr. A").unwrap();
        map.add_physician_roi("Dr. A", "PTV", "PTV_6000").unwrap();
        map.add_physician_roi("Dr. A", "Lung_L", "lung left").unwrap();
        map.add_variation("Dr. A", "lung left", "L Lung").unwrap();
        map
    }
}
