use serde::{Deserialize, Serialize};

/// Six-number summary used by distance, complexity and control-point stats
///
/// Percentiles use linear interpolation between closest ranks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub max: f64,
    pub p75: f64,
    pub median: f64,
    pub mean: f64,
    pub p25: f64,
    pub min: f64,
}

impl SummaryStats {
    /// Computes the summary of unweighted values
    ///
    /// Non-finite values are ignored. Returns `None` for an empty input.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Some(Self {
            max: sorted[sorted.len() - 1],
            p75: percentile_sorted(&sorted, 75.0),
            median: percentile_sorted(&sorted, 50.0),
            mean,
            p25: percentile_sorted(&sorted, 25.0),
            min: sorted[0],
        })
    }

    /// Computes the summary of `(value, weight)` pairs
    ///
    /// Percentiles are taken from the weighted empirical distribution: the
    /// smallest value whose cumulative weight reaches the requested fraction.
    pub fn from_weighted(samples: &[(f64, f64)]) -> Option<Self> {
        let mut sorted: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
            .collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total: f64 = sorted.iter().map(|(_, w)| w).sum();
        let mean = sorted.iter().map(|(v, w)| v * w).sum::<f64>() / total;
        let quantile = |fraction: f64| {
            let target = fraction * total;
            let mut cumulative = 0.0;
            for (value, weight) in &sorted {
                cumulative += weight;
                if cumulative >= target - 1e-12 {
                    return *value;
                }
            }
            sorted[sorted.len() - 1].0
        };

        Some(Self {
            max: sorted[sorted.len() - 1].0,
            p75: quantile(0.75),
            median: quantile(0.5),
            mean,
            p25: quantile(0.25),
            min: sorted[0].0,
        })
    }

    /// Applies `f` to every statistic, e.g. for unit conversion
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            max: f(self.max),
            p75: f(self.p75),
            median: f(self.median),
            mean: f(self.mean),
            p25: f(self.p25),
            min: f(self.min),
        }
    }
}

/// Linear-interpolated percentile over an ascending slice
pub fn percentile_sorted(sorted: &[f64], percent: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (percent / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
