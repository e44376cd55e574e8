//! Beam and plan complexity
//!
//! Per-control-point aperture scores come from an injectable
//! [`ControlPointScorer`]; this module only reduces them, MU weighted, to a
//! beam score and then to a plan score.

mod aperture;

pub use aperture::{ApertureScorer, MAX_FIELD_SIZE};

use crate::extraction::plan::{BeamRecord, PlanRecord};
use crate::types::SummaryStats;

/// Aperture geometry and score of one control point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApertureScore {
    /// mm²
    pub area: f64,
    /// mm
    pub x_perimeter: f64,
    /// mm
    pub y_perimeter: f64,
    pub score: f64,
}

/// Scores the aperture of a single control point
pub trait ControlPointScorer: Send + Sync {
    /// Returns `None` when the control point has no open aperture
    fn score(&self, beam: &BeamRecord, cp_index: usize) -> Option<ApertureScore>;
}

/// MU-weighted complexity of one beam
#[derive(Debug, Clone, PartialEq)]
pub struct BeamComplexity {
    pub beam_number: i32,
    pub complexity: f64,
    /// Per-control-point scores of control points delivering MU
    pub stats: Option<SummaryStats>,
}

/// Complexity of every scored beam plus the plan aggregate
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanComplexity {
    pub beams: Vec<BeamComplexity>,
    pub plan: Option<f64>,
    /// Σ mu_b × fx_b over the scored beams
    pub weight: f64,
}

impl PlanComplexity {
    pub fn beam(&self, beam_number: i32) -> Option<&BeamComplexity> {
        self.beams.iter().find(|b| b.beam_number == beam_number)
    }

    /// Complexity of several plans summed into one domain, weighted like beams
    pub fn combined(plans: &[PlanComplexity]) -> Option<f64> {
        let weights: f64 = plans.iter().filter(|p| p.plan.is_some()).map(|p| p.weight).sum();
        if weights <= 0.0 {
            return None;
        }
        let weighted: f64 = plans
            .iter()
            .filter_map(|p| p.plan.map(|c| c * p.weight))
            .sum();
        Some(weighted / weights)
    }
}

/// Σ score_i × cp_mu_i / beam_mu over control points delivering MU
///
/// Returns `None` for beams without a positive meterset or without any
/// scorable control point.
pub fn beam_complexity(beam: &BeamRecord, scorer: &dyn ControlPointScorer) -> Option<BeamComplexity> {
    let beam_mu = beam.beam_mu.filter(|mu| *mu > 0.0)?;
    let mut total = 0.0;
    let mut scores = Vec::new();
    for (i, cp_mu) in beam.control_point_mu().into_iter().enumerate() {
        if cp_mu <= 0.0 {
            continue;
        }
        if let Some(aperture) = scorer.score(beam, i) {
            total += aperture.score * cp_mu / beam_mu;
            scores.push(aperture.score);
        }
    }
    if scores.is_empty() {
        return None;
    }
    Some(BeamComplexity {
        beam_number: beam.beam_number,
        complexity: total,
        stats: SummaryStats::from_values(&scores),
    })
}

/// Scores all beams and aggregates them over fraction groups
///
/// Plan complexity is `scale × Σ(c_b·mu_b·fx_b) / Σ(mu_b·fx_b)`, with `fx_b`
/// the fraction count of the beam's fraction group.
pub fn plan_complexity(
    plan: &PlanRecord,
    scorer: &dyn ControlPointScorer,
    scale: f64,
) -> PlanComplexity {
    let mut weighted = 0.0;
    let mut weights = 0.0;
    let mut beams = Vec::new();

    for beam in &plan.beams {
        let Some(result) = beam_complexity(beam, scorer) else {
            continue;
        };
        let fxs = plan
            .fraction_groups
            .iter()
            .find(|rx| Some(rx.fx_grp_number) == beam.fx_grp_number)
            .map(|rx| rx.fx_count.max(0) as f64)
            .unwrap_or(1.0);
        let mu = beam.beam_mu.unwrap_or(0.0);
        weighted += result.complexity * mu * fxs;
        weights += mu * fxs;
        beams.push(result);
    }

    PlanComplexity {
        beams,
        plan: (weights > 0.0).then(|| scale * weighted / weights),
        weight: weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::plan::fixtures::simple_plan;
    use std::path::PathBuf;

    struct Constant(f64);

    impl ControlPointScorer for Constant {
        fn score(&self, _beam: &BeamRecord, _cp_index: usize) -> Option<ApertureScore> {
            Some(ApertureScore {
                area: 1.0,
                x_perimeter: 0.0,
                y_perimeter: 0.0,
                score: self.0,
            })
        }
    }

    fn plan() -> PlanRecord {
        PlanRecord::from_dicom(
            PathBuf::from("plan.dcm"),
            &simple_plan("1.1.1", "9.9", "9.9.1", 5000.0, 25),
        )
        .unwrap()
    }

    #[test]
    fn test_default_scorer_on_static_field() {
        let result = plan_complexity(&plan(), &ApertureScorer::default(), 1000.0);
        let beam = result.beam(1).unwrap();
        assert!((beam.complexity - 0.04).abs() < 1e-12);
        assert!((result.plan.unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_injected_scorer() {
        let result = plan_complexity(&plan(), &Constant(2.0), 1.0);
        assert_eq!(result.beams.len(), 1);
        assert!((result.plan.unwrap() - 2.0).abs() < 1e-12);
        let stats = result.beams[0].stats.as_ref().unwrap();
        assert_eq!(stats.max, 2.0);
    }

    #[test]
    fn test_mu_weighting_across_beams() {
        let mut plan = plan();
        let mut second = plan.beams[0].clone();
        second.beam_number = 2;
        second.beam_mu = Some(600.0);
        plan.beams.push(second);

        struct ByBeam;
        impl ControlPointScorer for ByBeam {
            fn score(&self, beam: &BeamRecord, _cp_index: usize) -> Option<ApertureScore> {
                Some(ApertureScore {
                    area: 1.0,
                    x_perimeter: 0.0,
                    y_perimeter: 0.0,
                    score: beam.beam_number as f64,
                })
            }
        }
        // (1 × 200 + 2 × 600) / 800
        let result = plan_complexity(&plan, &ByBeam, 1.0);
        assert!((result.plan.unwrap() - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_combined_domain() {
        let mut small = plan();
        small.fraction_groups[0].fx_count = 5;
        let a = plan_complexity(&plan(), &Constant(1.0), 1.0);
        let b = plan_complexity(&small, &Constant(4.0), 1.0);
        assert_eq!(a.weight, 5000.0);
        assert_eq!(b.weight, 1000.0);
        // (1 × 5000 + 4 × 1000) / 6000
        assert!((PlanComplexity::combined(&[a, b]).unwrap() - 1.5).abs() < 1e-12);
        assert_eq!(PlanComplexity::combined(&[]), None);
    }

    #[test]
    fn test_beam_without_mu_is_unscored() {
        let mut beam = plan().beams[0].clone();
        beam.beam_mu = None;
        assert!(beam_complexity(&beam, &ApertureScorer::default()).is_none());
    }
}
