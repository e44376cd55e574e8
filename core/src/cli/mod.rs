pub mod report;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Command-line arguments for dvhcat
#[derive(Parser, Debug)]
#[command(name = "dvhcat")]
#[command(about = "Import radiotherapy plan, dose and structure files into DVH tables")]
#[command(version)]
pub struct Cli {
    /// Directory containing DICOM RT files
    #[arg(value_name = "DIR")]
    pub directory: PathBuf,

    /// Directory receiving the JSON-lines tables; rows are kept in memory otherwise
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Replace studies already stored in the output tables instead of skipping them
    #[arg(long, requires = "out")]
    pub replace: bool,

    /// JSON import configuration
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// ROI name map; unmapped names are recorded into it and it is saved back
    #[arg(long, value_name = "FILE")]
    pub roi_map: Option<PathBuf>,

    /// Worker threads (overrides the configuration; 0 lets rayon decide)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Output format options
#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
}
