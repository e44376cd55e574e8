use clap::{Parser, Subcommand};
use dvhcat_core::roi_map::{clean_physician_name, import_legacy_roi_file, Resolution};
use dvhcat_core::{ImportConfig, JsonLinesSink, Result, RoiNameMap, RoiType, RowStore};
use log::{info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

/// CLI tool for curating the institutional/physician ROI name map
///
/// Every edit is saved to MAP and then applied to the stored DVHs rows of
/// each output directory the map remembers.
#[derive(Parser, Debug)]
#[command(name = "roimap")]
#[command(about = "Inspect and edit the ROI name map used by dvhcat")]
#[command(version)]
struct Cli {
    /// ROI map file (created on the first edit)
    #[arg(value_name = "MAP")]
    map: PathBuf,

    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the map, or one physician's part of it
    Show {
        physician: Option<String>,
        /// Print the map as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a raw ROI name for a physician
    Resolve { physician: String, name: String },
    /// Add an institutional ROI
    AddInstitutional { name: String },
    /// Add a physician
    AddPhysician { physician: String },
    /// Add a physician ROI linked to an institutional ROI
    AddRoi {
        physician: String,
        institutional_roi: String,
        physician_roi: String,
    },
    /// Add a raw-name variation to a physician ROI
    AddVariation {
        physician: String,
        physician_roi: String,
        variation: String,
    },
    /// Fold one physician ROI into another
    Merge { physician: String, from: String, into: String },
    /// Rename a physician ROI, or an institutional ROI when no physician is given
    Rename {
        old: String,
        new: String,
        #[arg(long)]
        physician: Option<String>,
    },
    /// Override the ROI type of a physician ROI; omit the type to clear it
    SetType {
        physician: String,
        physician_roi: String,
        roi_type: Option<String>,
    },
    /// Import a legacy `.roi` file
    ImportLegacy {
        file: PathBuf,
        /// Physician of the file; taken from `physician_<NAME>.roi` otherwise
        #[arg(long)]
        physician: Option<String>,
    },
    /// Re-resolve stored DVHs rows
    Remap {
        /// Output directory to remap and remember; every remembered one otherwise
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut map = match RoiNameMap::load_or_default(&cli.map) {
        Ok(map) => map,
        Err(e) => {
            eprintln!("Error: Failed to load ROI map {}: {}", cli.map.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = execute(&mut map, &cli.map, &cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn setup_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
}

/// Runs one command, saves the map when it changed and retargets the
/// remembered row stores after a naming edit
fn execute(map: &mut RoiNameMap, path: &Path, command: &Command) -> Result<()> {
    let version = map.version();
    if run(map, command)? {
        map.save(path)?;
        info!("Saved ROI map v{} to {}", map.version(), path.display());
    }
    if map.version() != version {
        let changed = retarget_row_stores(map)?;
        if changed > 0 {
            info!("Retargeted {} stored DVH rows", changed);
        }
    }
    Ok(())
}

/// Remaps every remembered row store that still exists
fn retarget_row_stores(map: &RoiNameMap) -> Result<usize> {
    let mut changed = 0;
    for directory in map.row_stores() {
        if !directory.is_dir() {
            warn!("Row store {} no longer exists", directory.display());
            continue;
        }
        changed += JsonLinesSink::new(directory)?.remap(map)?;
    }
    Ok(changed)
}

/// Executes one command; returns whether the map needs saving
fn run(map: &mut RoiNameMap, command: &Command) -> Result<bool> {
    let before = map.version();
    let mut registered = false;
    match command {
        Command::Show { physician, json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(&*map)?);
            } else {
                print!("{}", MapReport::new(map, physician.as_deref()));
            }
        }
        Command::Resolve { physician, name } => {
            let config = ImportConfig::default();
            match map.resolve(physician, name, config.similarity_threshold, config.max_suggestions) {
                Resolution::Mapped(m) => {
                    println!("{} -> {} ({})", name, m.physician_roi, m.institutional_roi);
                }
                Resolution::Uncategorized { suggestions } => {
                    println!("{} -> uncategorized", name);
                    for s in suggestions {
                        println!("  {:.2} {} ({}) via '{}'", s.score, s.physician_roi, s.institutional_roi, s.variation);
                    }
                }
            }
        }
        Command::AddInstitutional { name } => map.add_institutional(name)?,
        Command::AddPhysician { physician } => map.add_physician(physician)?,
        Command::AddRoi {
            physician,
            institutional_roi,
            physician_roi,
        } => map.add_physician_roi(physician, institutional_roi, physician_roi)?,
        Command::AddVariation {
            physician,
            physician_roi,
            variation,
        } => map.add_variation(physician, physician_roi, variation)?,
        Command::Merge { physician, from, into } => map.merge(physician, from, into)?,
        Command::Rename { old, new, physician } => match physician {
            Some(physician) => map.rename_physician_roi(physician, old, new)?,
            None => map.rename_institutional(old, new)?,
        },
        Command::SetType {
            physician,
            physician_roi,
            roi_type,
        } => {
            let roi_type = roi_type.as_deref().map(RoiType::from_str);
            map.set_roi_type(physician, physician_roi, roi_type)?
        }
        Command::ImportLegacy { file, physician } => {
            let applied = import_legacy_roi_file(map, file, physician.as_deref())?;
            println!("Applied {} lines from {}", applied, file.display());
        }
        Command::Remap { out: Some(out) } => {
            let mut store = JsonLinesSink::new(out)?;
            let changed = store.remap(map)?;
            registered = map.register_row_store(&fs::canonicalize(store.directory())?);
            println!("Remapped {} DVH rows", changed);
        }
        Command::Remap { out: None } => {
            let changed = retarget_row_stores(map)?;
            println!("Remapped {} DVH rows in {} stores", changed, map.row_stores().len());
        }
    }
    Ok(registered || map.version() != before)
}

/// Text listing of the map
struct MapReport<'a> {
    map: &'a RoiNameMap,
    physician: Option<&'a str>,
}

impl<'a> MapReport<'a> {
    fn new(map: &'a RoiNameMap, physician: Option<&'a str>) -> Self {
        Self { map, physician }
    }
}

impl<'a> fmt::Display for MapReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ROI Map v{}", self.map.version())?;
        writeln!(f, "==========")?;
        writeln!(f)?;
        writeln!(f, "Institutional ROIs: {}", self.map.institutional_rois().len())?;
        for name in self.map.institutional_rois() {
            writeln!(f, "  {}", name)?;
        }

        let wanted = self.physician.map(clean_physician_name);
        for physician in self.map.physicians() {
            if wanted.as_ref().is_some_and(|w| w != physician) {
                continue;
            }
            let Some(rois) = self.map.physician(physician) else {
                continue;
            };
            writeln!(f)?;
            writeln!(f, "{}", physician)?;
            writeln!(f, "{}", "-".repeat(physician.len()))?;
            for (name, roi) in &rois.rois {
                let variations: Vec<&str> = roi.variations.iter().map(String::as_str).collect();
                write!(f, "{} -> {}", name, roi.institutional_roi)?;
                if let Some(roi_type) = &roi.roi_type {
                    write!(f, " [{}]", roi_type.as_str())?;
                }
                writeln!(f, ": {}", variations.join(", "))?;
            }
            if !rois.uncategorized.is_empty() {
                let names: Vec<&str> = rois.uncategorized.iter().map(String::as_str).collect();
                writeln!(f, "uncategorized: {}", names.join(", "))?;
            }
        }
        Ok(())
    }
}
