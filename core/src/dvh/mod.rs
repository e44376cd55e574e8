//! Cumulative dose-volume histograms
//!
//! [`calculate_dvh`] samples the summed dose grid over an ROI and returns a
//! [`DvhRecord`]: cumulative volume per fixed-width dose bin, together with
//! min, mean and max dose taken from the same samples.

mod calc;

pub use calc::{calculate_dvh, DvhCalculation};

use crate::types::ImportConfig;
use serde::{Deserialize, Serialize};

/// Sampling used to build a DVH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DvhResolution {
    Standard,
    High,
}

/// Cumulative DVH of one ROI
///
/// `counts[i]` is the volume (cm³) receiving at least `i × bin_width` Gy.
/// The sequence is non-increasing and `counts[0]` equals `volume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvhRecord {
    /// cm³
    pub volume: f64,
    /// Gy
    pub min_dose: f64,
    /// Gy, volume weighted
    pub mean_dose: f64,
    /// Gy, capped at the configured ceiling
    pub max_dose: f64,
    pub bin_width: f64,
    pub counts: Vec<f64>,
    pub resolution: DvhResolution,
}

impl DvhRecord {
    /// Builds the histogram from `(dose Gy, volume mm³)` samples
    pub fn from_samples(samples: &[(f64, f64)], config: &ImportConfig, resolution: DvhResolution) -> Self {
        let width = config.dvh_bin_width_gy;
        let ceiling = config.dvh_max_dose_gy;

        let total_mm3: f64 = samples.iter().map(|(_, v)| v).sum();
        let max = samples.iter().map(|(d, _)| *d).fold(0.0, f64::max);
        let min = samples
            .iter()
            .map(|(d, _)| *d)
            .fold(f64::INFINITY, f64::min);
        let mean = if total_mm3 > 0.0 {
            samples.iter().map(|(d, v)| d * v).sum::<f64>() / total_mm3
        } else {
            0.0
        };

        let capped_max = max.min(ceiling);
        let bins = (capped_max / width - 1e-9).ceil().max(0.0) as usize + 1;
        let mut differential = vec![0.0; bins];
        for (dose, volume) in samples {
            let bin = ((dose / width + 1e-9).floor().max(0.0) as usize).min(bins - 1);
            differential[bin] += volume / 1000.0;
        }
        let mut counts = vec![0.0; bins];
        let mut running = 0.0;
        for i in (0..bins).rev() {
            running += differential[i];
            counts[i] = running;
        }

        Self {
            volume: total_mm3 / 1000.0,
            min_dose: if min.is_finite() { min.min(ceiling) } else { 0.0 },
            mean_dose: mean,
            max_dose: capped_max,
            bin_width: width,
            counts,
            resolution,
        }
    }

    /// Cumulative volumes as `%.5f` CSV
    pub fn to_csv(&self) -> String {
        self.counts
            .iter()
            .map(|c| format!("{:.5}", c))
            .collect::<Vec<_>>()
            .join(",")
    }
}
