use clap::Parser;
use dvhcat_core::association::discover_files;
use dvhcat_core::cli::{Cli, OutputFormat};
use dvhcat_core::{
    ApertureScorer, CancellationToken, DuplicatePolicy, ImportConfig, ImportPipeline, ImportReport, JsonLinesSink,
    MemorySink, RoiNameMap, RowSink, TextReport,
};
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn main() {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    if !cli.directory.is_dir() {
        eprintln!("Error: {} is not a directory", cli.directory.display());
        process::exit(1);
    }

    let mut config = match &cli.config {
        Some(path) => match ImportConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: Failed to load config {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => ImportConfig::default(),
    };
    if let Some(jobs) = cli.jobs {
        config = config.with_concurrency(jobs);
    }

    let mut roi_map = match &cli.roi_map {
        Some(path) => match RoiNameMap::load_or_default(path) {
            Ok(map) => map,
            Err(e) => {
                eprintln!("Error: Failed to load ROI map {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => RoiNameMap::new(),
    };

    info!("Processing directory: {}", cli.directory.display());
    let files = match discover_files(&cli.directory, cli.recursive) {
        Ok(files) => files,
        Err(e) => {
            error!("Failed to read directory: {}", e);
            eprintln!("Error: Failed to read directory: {}", e);
            process::exit(1);
        }
    };
    if files.is_empty() {
        eprintln!("Error: No DICOM files found in directory");
        process::exit(1);
    }
    info!("Found {} DICOM files", files.len());

    let scorer = Arc::new(ApertureScorer::from_config(&config));
    let pipeline = match ImportPipeline::new(config, roi_map.clone(), scorer) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let mut sink: Box<dyn RowSink> = match &cli.out {
        Some(dir) => match JsonLinesSink::new(dir) {
            Ok(sink) if cli.replace => Box::new(sink.with_policy(DuplicatePolicy::Replace)),
            Ok(sink) => Box::new(sink),
            Err(e) => {
                eprintln!("Error: Cannot open output directory {}: {}", dir.display(), e);
                process::exit(1);
            }
        },
        None => Box::new(MemorySink::new()),
    };

    let report = match pipeline.run_paths(&files, sink.as_mut(), &CancellationToken::new()) {
        Ok(report) => report,
        Err(e) => {
            error!("Import failed: {}", e);
            eprintln!("Error: Import failed: {}", e);
            process::exit(1);
        }
    };

    if let Some(path) = &cli.roi_map {
        save_reviews(&mut roi_map, &report, path, cli.out.as_deref());
    }

    output_report(&report, cli.format);
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

/// Holds every reviewed name as uncategorized; returns how many were new
fn record_reviews(map: &mut RoiNameMap, report: &ImportReport) -> usize {
    let mut added = 0;
    for review in &report.reviews {
        match map.record_uncategorized(&review.physician, &review.roi_name) {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(e) => warn!("Cannot record {}: {}", review.roi_name, e),
        }
    }
    added
}

/// Remembers an output directory so later map edits retarget its rows
fn remember_store(map: &mut RoiNameMap, out: &Path) -> bool {
    match fs::canonicalize(out) {
        Ok(dir) => map.register_row_store(&dir),
        Err(e) => {
            warn!("Cannot remember output directory {}: {}", out.display(), e);
            false
        }
    }
}

fn save_reviews(map: &mut RoiNameMap, report: &ImportReport, path: &Path, out: Option<&Path>) {
    let added = record_reviews(map, report);
    let registered = out.is_some_and(|out| remember_store(map, out));
    if added == 0 && !registered {
        return;
    }
    match map.save(path) {
        Ok(()) => info!("Saved ROI map {} ({} new uncategorized names)", path.display(), added),
        Err(e) => {
            error!("Failed to save ROI map: {}", e);
            eprintln!("Error: Failed to save ROI map {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn output_report(report: &ImportReport, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!("{}", TextReport::new(report));
        }
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize to JSON: {}", e);
                eprintln!("Error: Failed to serialize to JSON: {}", e);
                process::exit(1);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvhcat_core::pipeline::NameReview;

    fn review(physician: &str, roi_name: &str) -> NameReview {
        NameReview {
            patient_id: "MRN001".to_string(),
            study_instance_uid: "9.9".to_string(),
            physician: physician.to_string(),
            roi_name: roi_name.to_string(),
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn test_record_reviews_once() {
        let mut map = RoiNameMap::new();
        let report = ImportReport {
            reviews: vec![review("DR._A", "lung lt"), review("DR._A", "Lung LT"), review("DR._B", "cord")],
            ..Default::default()
        };

        assert_eq!(record_reviews(&mut map, &report), 2);
        assert_eq!(map.version(), 2);
        assert_eq!(record_reviews(&mut map, &report), 0);
        assert!(map.physician("DR._A").unwrap().uncategorized.contains("lung lt"));
    }

    #[test]
    fn test_remember_store_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut map = RoiNameMap::new();

        assert!(remember_store(&mut map, dir.path()));
        assert!(!remember_store(&mut map, dir.path()));
        assert!(!remember_store(&mut map, &dir.path().join("missing")));
        assert_eq!(map.row_stores().len(), 1);
        assert_eq!(map.version(), 0);
    }
}
