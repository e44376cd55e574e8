use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::{ImportConfig, Point3, SummaryStats};
use serde::{Deserialize, Serialize};

use super::contour::RoiContour;
use super::index::sample_evenly;
use super::raster::interior_samples;
use super::target::TargetReference;

const CANCEL_CHECK_INTERVAL: usize = 256;

/// Fixed-width histogram of signed distances
///
/// Bin `k` covers `[start + k·w, start + (k+1)·w)`. `start` is a multiple of
/// the bin width, so a distance of exactly zero always opens a bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub start: f64,
    pub bin_width: f64,
    pub counts: Vec<f64>,
}

impl Histogram {
    /// Bins `(value, weight)` samples
    pub fn from_weighted(samples: &[(f64, f64)], bin_width: f64) -> Option<Self> {
        let bin_of = |v: f64| (v / bin_width + 1e-9).floor() as i64;
        let first = samples.iter().map(|(v, _)| bin_of(*v)).min()?;
        let last = samples.iter().map(|(v, _)| bin_of(*v)).max()?;

        let mut counts = vec![0.0; (last - first + 1) as usize];
        for (value, weight) in samples {
            counts[(bin_of(*value) - first) as usize] += weight;
        }
        Some(Self {
            start: first as f64 * bin_width,
            bin_width,
            counts,
        })
    }

    /// Counts as `%.3f` CSV
    pub fn to_csv(&self) -> String {
        self.counts
            .iter()
            .map(|c| format!("{:.3}", c))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Whether any bin lies below zero distance
    pub fn has_negative_bins(&self) -> bool {
        self.start < -1e-12 && !self.counts.is_empty()
    }
}

/// Summary and histogram of signed ROI-to-target distances, cm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMetrics {
    pub stats: SummaryStats,
    pub histogram: Histogram,
}

/// Distance-to-target histogram over sampled boundary vertices
///
/// Each sampled ROI vertex contributes its signed distance to the target
/// surface, negative when the vertex lies inside the target.
pub fn distance_to_target(
    roi: &RoiContour,
    target: &TargetReference,
    config: &ImportConfig,
    cancel: &CancellationToken,
) -> Result<Option<DistanceMetrics>> {
    let points = sample_evenly(&roi.boundary_points(), config.distance_max_points);
    let mut samples = Vec::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        if let Some(d) = target.signed_distance(point) {
            samples.push((d / 10.0, 1.0));
        }
    }
    Ok(summarize(&samples, config.dth_bin_width_cm, false))
}

/// Overlap-volume histogram over interior sample points
///
/// Interior points are sampled on a regular in-plane lattice; each carries
/// the volume it stands for, so the summary is volume-weighted and the
/// histogram bins hold cm³.
pub fn overlap_volume_histogram(
    roi: &RoiContour,
    target: &TargetReference,
    config: &ImportConfig,
    cancel: &CancellationToken,
) -> Result<Option<DistanceMetrics>> {
    let total_area: f64 = roi.slices().iter().map(|s| s.region.area()).sum();
    let budget = config.distance_max_points.max(1) as f64;
    let step = config.ovh_resolution_mm.max((total_area / budget).sqrt());

    let mut samples = Vec::new();
    let mut visited = 0usize;
    for slice in roi.slices() {
        cancel.check()?;
        for ([x, y], area) in interior_samples(&slice.region, step) {
            visited += 1;
            if visited % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            if let Some(d) = target.signed_distance(&Point3::new(x, y, slice.z)) {
                samples.push((d / 10.0, area * slice.thickness / 1000.0));
            }
        }
    }
    Ok(summarize(&samples, config.dth_bin_width_cm, true))
}

fn summarize(samples: &[(f64, f64)], bin_width: f64, weighted: bool) -> Option<DistanceMetrics> {
    let stats = if weighted {
        SummaryStats::from_weighted(samples)?
    } else {
        let values: Vec<f64> = samples.iter().map(|(v, _)| *v).collect();
        SummaryStats::from_values(&values)?
    };
    Some(DistanceMetrics {
        stats,
        histogram: Histogram::from_weighted(samples, bin_width)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::contour::fixtures::prism;

    fn target() -> TargetReference {
        TargetReference::new(vec![prism(0.0, 0.0, 10.0, 0.0, 20.0, 2.5)]).unwrap()
    }

    #[test]
    fn test_histogram_bins() {
        let hist = Histogram::from_weighted(&[(-0.05, 1.0), (0.0, 1.0), (0.3, 2.0)], 0.1).unwrap();
        assert!((hist.start + 0.1).abs() < 1e-12);
        assert_eq!(hist.counts, vec![1.0, 1.0, 0.0, 0.0, 2.0]);
        assert_eq!(hist.to_csv(), "1.000,1.000,0.000,0.000,2.000");
        assert_eq!(hist.total(), 4.0);
        assert!(hist.has_negative_bins());
        assert!(Histogram::from_weighted(&[], 0.1).is_none());
    }

    #[test]
    fn test_dth_exterior_roi_has_no_negative_bins() {
        let roi = prism(40.0, 0.0, 5.0, 5.0, 15.0, 2.5);
        let metrics = distance_to_target(&roi, &target(), &ImportConfig::default(), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!(!metrics.histogram.has_negative_bins());
        assert!(metrics.stats.min > 0.0);
        // nearest corners: (35, ±5) against (10, ±10)
        assert!((metrics.stats.min - 650f64.sqrt() / 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dth_overlapping_roi_has_negative_bins() {
        let roi = prism(10.0, 0.0, 5.0, 5.0, 15.0, 2.5);
        let metrics = distance_to_target(&roi, &target(), &ImportConfig::default(), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!(metrics.histogram.has_negative_bins());
        assert!(metrics.stats.min < 0.0);
    }

    #[test]
    fn test_ovh_is_volume_weighted() {
        let roi = prism(40.0, 0.0, 5.0, 5.0, 15.0, 2.5);
        let config = ImportConfig::default();
        let metrics = overlap_volume_histogram(&roi, &target(), &config, &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!((metrics.histogram.total() - roi.volume_mm3() / 1000.0).abs() < 1e-6);
        assert!(metrics.stats.min >= 2.5 - 1e-9);
        assert!(metrics.stats.median > metrics.stats.min);
    }

    #[test]
    fn test_ovh_sub_cell_roi_keeps_its_volume() {
        // 0.8 mm square against a 2 mm lattice
        let roi = prism(40.0, 0.0, 0.4, 5.0, 15.0, 2.5);
        let metrics = overlap_volume_histogram(&roi, &target(), &ImportConfig::default(), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!((metrics.histogram.total() - roi.volume_mm3() / 1000.0).abs() < 1e-9);
        assert!(metrics.stats.min >= 3.0 - 1e-9);
        assert!(!metrics.histogram.has_negative_bins());
    }

    #[test]
    fn test_cancellation_unwinds() {
        let roi = prism(40.0, 0.0, 5.0, 5.0, 15.0, 2.5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = distance_to_target(&roi, &target(), &ImportConfig::default(), &cancel);
        assert!(result.is_err());
    }
}
