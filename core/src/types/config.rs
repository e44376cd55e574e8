use crate::error::{DvhcatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration threaded into every import run
///
/// Holds bin widths, resolution and memory thresholds, complexity constants
/// and the name-matching threshold. Nothing in the pipeline reads ambient
/// state; everything tunable lives here.
///
/// # Example
///
/// ```
/// use dvhcat_core::ImportConfig;
///
/// let config = ImportConfig::default()
///     .with_concurrency(4)
///     .with_similarity_threshold(0.7);
///
/// assert_eq!(config.concurrency, 4);
/// assert_eq!(config.dvh_bin_width_gy, 0.01);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Dose bin width of the cumulative DVH, Gy
    pub dvh_bin_width_gy: f64,

    /// Dose ceiling for DVH bins and reported max dose, Gy
    pub dvh_max_dose_gy: f64,

    /// ROIs smaller than this (cm³) use the high resolution DVH path
    pub dvh_small_volume_cc: f64,

    /// In-plane subdivision factor of the high resolution DVH path
    pub dvh_high_res_factor: usize,

    /// DTH/OVH histogram bin width, cm
    pub dth_bin_width_cm: f64,

    /// Interior sampling step for OVH and PTV centroid, mm
    pub ovh_resolution_mm: f64,

    /// Raster step for overlap and surface cap areas, mm
    pub overlap_resolution_mm: f64,

    /// Absolute tolerance when comparing dose grid geometry, mm
    pub grid_tolerance_mm: f64,

    /// Estimated summation memory above which the streaming path is used
    pub memory_threshold_bytes: u64,

    /// Frames decoded per chunk in the streaming summation path
    pub stream_chunk_frames: usize,

    /// Maximum number of sampled points per distance computation
    pub distance_max_points: usize,

    /// Weight of the leaf-travel (x) perimeter in aperture complexity
    pub complexity_x_weight: f64,

    /// Weight of the leaf-side (y) perimeter in aperture complexity
    pub complexity_y_weight: f64,

    /// Constant applied to the MU-weighted plan complexity
    pub complexity_scale: f64,

    /// Minimum similarity for a fuzzy ROI name suggestion
    pub similarity_threshold: f64,

    /// Maximum suggestions offered per uncategorized name
    pub max_suggestions: usize,

    /// Worker count; 0 lets rayon decide
    pub concurrency: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            dvh_bin_width_gy: 0.01,
            dvh_max_dose_gy: 500.0,
            dvh_small_volume_cc: 10.0,
            dvh_high_res_factor: 8,
            dth_bin_width_cm: 0.1,
            ovh_resolution_mm: 2.0,
            overlap_resolution_mm: 0.5,
            grid_tolerance_mm: 1e-3,
            memory_threshold_bytes: 512 * 1024 * 1024,
            stream_chunk_frames: 8,
            distance_max_points: 5000,
            complexity_x_weight: 1.0,
            complexity_y_weight: 1.0,
            complexity_scale: 1000.0,
            similarity_threshold: 0.5,
            max_suggestions: 3,
            concurrency: 0,
        }
    }
}

impl ImportConfig {
    /// Loads a configuration from a JSON file
    ///
    /// Missing keys keep their default values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ImportConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every width, step and threshold is usable
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dvh_bin_width_gy", self.dvh_bin_width_gy),
            ("dvh_max_dose_gy", self.dvh_max_dose_gy),
            ("dth_bin_width_cm", self.dth_bin_width_cm),
            ("ovh_resolution_mm", self.ovh_resolution_mm),
            ("overlap_resolution_mm", self.overlap_resolution_mm),
            ("complexity_scale", self.complexity_scale),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DvhcatError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.grid_tolerance_mm < 0.0 {
            return Err(DvhcatError::Config(
                "grid_tolerance_mm must not be negative".to_string(),
            ));
        }
        if self.dvh_high_res_factor == 0 || self.stream_chunk_frames == 0 {
            return Err(DvhcatError::Config(
                "dvh_high_res_factor and stream_chunk_frames must be at least 1".to_string(),
            ));
        }
        if self.distance_max_points < 2 {
            return Err(DvhcatError::Config(
                "distance_max_points must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DvhcatError::Config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    /// Builder: Set worker count (0 = rayon default)
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    /// Builder: Set the fuzzy suggestion threshold
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Builder: Set the streaming summation threshold
    ///
    /// # Example
    ///
    /// ```
    /// use dvhcat_core::ImportConfig;
    ///
    /// let config = ImportConfig::default().with_memory_threshold(0);
    /// assert_eq!(config.memory_threshold_bytes, 0);
    /// ```
    pub fn with_memory_threshold(mut self, bytes: u64) -> Self {
        self.memory_threshold_bytes = bytes;
        self
    }

    /// Builder: Set DVH bin width and ceiling
    pub fn with_dvh_bins(mut self, width_gy: f64, max_dose_gy: f64) -> Self {
        self.dvh_bin_width_gy = width_gy;
        self.dvh_max_dose_gy = max_dose_gy;
        self
    }

    /// Builder: Set the small-volume threshold for high resolution DVHs
    pub fn with_small_volume(mut self, volume_cc: f64, factor: usize) -> Self {
        self.dvh_small_volume_cc = volume_cc;
        self.dvh_high_res_factor = factor;
        self
    }

    /// Builder: Set the raster steps for overlap and OVH sampling
    pub fn with_sampling(mut self, overlap_mm: f64, ovh_mm: f64) -> Self {
        self.overlap_resolution_mm = overlap_mm;
        self.ovh_resolution_mm = ovh_mm;
        self
    }

    /// Builder: Set the complexity perimeter weights and plan scale
    pub fn with_complexity(mut self, x_weight: f64, y_weight: f64, scale: f64) -> Self {
        self.complexity_x_weight = x_weight;
        self.complexity_y_weight = y_weight;
        self.complexity_scale = scale;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        assert!(ImportConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ImportConfig::default().with_dvh_bins(0.0, 500.0);
        assert!(matches!(config.validate(), Err(DvhcatError::Config(_))));

        let config = ImportConfig::default().with_similarity_threshold(1.5);
        assert!(config.validate().is_err());

        let config = ImportConfig::default().with_small_volume(10.0, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial_keys() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 3, "dvh_bin_width_gy": 0.05}}"#).unwrap();

        let config = ImportConfig::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.dvh_bin_width_gy, 0.05);
        assert_eq!(config.dvh_max_dose_gy, 500.0);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"ovh_resolution_mm": -1.0}}"#).unwrap();
        assert!(ImportConfig::from_file(file.path()).is_err());
    }
}
