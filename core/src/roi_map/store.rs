use crate::error::{DvhcatError, Result};
use crate::persist::replace_file;
use log::{debug, info, warn};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use super::map::{RoiNameMap, DEFAULT_PHYSICIAN, UNCATEGORIZED};
use super::name::{clean_name, clean_physician_name};

impl RoiNameMap {
    /// Loads a map saved with [`RoiNameMap::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut map: RoiNameMap = serde_json::from_str(&text)?;
        map.ensure_default();
        debug!("Loaded ROI map v{} from {}", map.version(), path.display());
        Ok(map)
    }

    /// Loads `path` when it exists, otherwise starts an empty map
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No ROI map at {}, starting empty", path.display());
            Ok(Self::default())
        }
    }

    /// Writes the map as JSON
    ///
    /// The JSON goes to a sibling temp file that then replaces `path`, so a
    /// reader sees either the old map or the new one.
    pub fn save(&self, path: &Path) -> Result<()> {
        replace_file(path, |writer| Ok(serde_json::to_writer_pretty(writer, self)?))?;
        debug!("Saved ROI map v{} to {}", self.version(), path.display());
        Ok(())
    }
}

fn quoted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]*)""#).expect("valid regex"))
}

/// Splits one legacy line into its fields
///
/// Quoted lines take every quoted string; unquoted lines split the first two
/// fields on `:` and the rest on `,`.
fn legacy_fields(line: &str) -> Vec<String> {
    let fields: Vec<String> = if line.contains('"') {
        quoted_regex()
            .captures_iter(line)
            .map(|c| c[1].to_string())
            .collect()
    } else {
        let mut parts = line.splitn(3, ':');
        let mut fields: Vec<String> = parts.by_ref().take(2).map(str::to_string).collect();
        if let Some(rest) = parts.next() {
            fields.extend(rest.split(',').map(str::to_string));
        }
        fields
    };
    fields
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Physician encoded in a legacy file name such as `physician_DR_A.roi`
fn physician_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("physician_").map(clean_physician_name)
}

/// Imports a legacy per-physician ROI file into `map`
///
/// Each line reads `"institutional":"physician_roi":"var1","var2"`; for the
/// `DEFAULT` physician only the institutional ROI is used. The physician is
/// taken from the file name when not given. Entries already in the map are
/// skipped, and a variation owned by another physician ROI is skipped with
/// a warning. Returns the number of lines applied.
pub fn import_legacy_roi_file(map: &mut RoiNameMap, path: &Path, physician: Option<&str>) -> Result<usize> {
    let physician = match physician {
        Some(p) => clean_physician_name(p),
        None => physician_from_file_name(path).ok_or_else(|| {
            DvhcatError::RoiMap(format!(
                "cannot tell the physician of {}; name it physician_<NAME>.roi",
                path.display()
            ))
        })?,
    };
    let text = fs::read_to_string(path)?;

    if physician != DEFAULT_PHYSICIAN && map.physician(&physician).is_none() {
        map.add_physician(&physician)?;
    }

    let mut applied = 0;
    for (line_no, line) in text.lines().enumerate() {
        let fields = legacy_fields(line);
        let Some(institutional) = fields.first() else {
            continue;
        };
        if institutional != UNCATEGORIZED && !map.institutional_rois().contains(institutional) {
            map.add_institutional(institutional)?;
        }
        if physician == DEFAULT_PHYSICIAN {
            applied += 1;
            continue;
        }
        let Some(physician_roi) = fields.get(1) else {
            warn!("{}:{}: no physician ROI, skipping", path.display(), line_no + 1);
            continue;
        };
        let exists = map
            .physician(&physician)
            .map(|rois| rois.rois.contains_key(physician_roi))
            .unwrap_or(false);
        if !exists {
            if let Err(e) = map.add_physician_roi(&physician, institutional, physician_roi) {
                warn!("{}:{}: {}", path.display(), line_no + 1, e);
                continue;
            }
        }
        for variation in &fields[2..] {
            let owned = map
                .resolve_exact(&physician, variation)
                .map(|m| m.physician != DEFAULT_PHYSICIAN && m.physician_roi == *physician_roi)
                .unwrap_or(false);
            if owned || clean_name(variation) == clean_name(physician_roi) {
                continue;
            }
            if let Err(e) = map.add_variation(&physician, physician_roi, variation) {
                warn!("{}:{}: {}", path.display(), line_no + 1, e);
            }
        }
        applied += 1;
    }
    info!(
        "Imported {} legacy ROI map lines for {} from {}",
        applied,
        physician,
        path.display()
    );
    Ok(applied)
}
