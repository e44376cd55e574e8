use crate::extraction::plan::BeamRecord;
use crate::types::ImportConfig;

use super::{ApertureScore, ControlPointScorer};

/// Field size assumed along an axis with no jaw positions, mm
pub const MAX_FIELD_SIZE: f64 = 400.0;

/// Aperture shape complexity of MLC/jaw openings
///
/// The score of a control point is the weighted aperture perimeter over its
/// area. The x perimeter counts edges running along leaf travel, the y
/// perimeter the leaf tip edges.
#[derive(Debug, Clone, PartialEq)]
pub struct ApertureScorer {
    pub x_weight: f64,
    pub y_weight: f64,
}

impl Default for ApertureScorer {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl ApertureScorer {
    pub fn new(x_weight: f64, y_weight: f64) -> Self {
        Self { x_weight, y_weight }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(config.complexity_x_weight, config.complexity_y_weight)
    }
}

fn jaw_or_open(jaw: Option<[f64; 2]>) -> (f64, f64) {
    match jaw {
        Some([a, b]) => (a.min(b), a.max(b)),
        None => (-MAX_FIELD_SIZE / 2.0, MAX_FIELD_SIZE / 2.0),
    }
}

fn overlap(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> f64 {
    match (a, b) {
        (Some((l0, r0)), Some((l1, r1))) => (r0.min(r1) - l0.max(l1)).max(0.0),
        _ => 0.0,
    }
}

fn length(interval: Option<(f64, f64)>) -> f64 {
    interval.map(|(l, r)| r - l).unwrap_or(0.0)
}

impl ControlPointScorer for ApertureScorer {
    fn score(&self, beam: &BeamRecord, cp_index: usize) -> Option<ApertureScore> {
        let cp = beam.control_points.get(cp_index)?;
        let (x1, x2) = jaw_or_open(cp.devices.jaw_x);
        let (y1, y2) = jaw_or_open(cp.devices.jaw_y);

        let boundaries = &beam.leaf_boundaries;
        let pairs = boundaries.len().saturating_sub(1);
        let (area, x_perimeter, y_perimeter) = match &cp.devices.mlc {
            Some(mlc) if pairs > 0 && mlc.len() == 2 * pairs => {
                // open x interval and width of each leaf pair row
                let rows: Vec<(Option<(f64, f64)>, f64)> = (0..pairs)
                    .map(|k| {
                        let width = (boundaries[k + 1].min(y2) - boundaries[k].max(y1)).max(0.0);
                        let left = mlc[k].max(x1);
                        let right = mlc[k + pairs].min(x2);
                        let open = (right > left && width > 0.0).then_some((left, right));
                        (open, width)
                    })
                    .collect();

                let area: f64 = rows.iter().map(|(open, w)| length(*open) * w).sum();
                let y_perimeter: f64 = rows
                    .iter()
                    .filter(|(open, _)| open.is_some())
                    .map(|(_, w)| 2.0 * w)
                    .sum();

                let mut x_perimeter = 0.0;
                let mut previous: Option<(f64, f64)> = None;
                for (open, _) in rows.iter().copied().chain(std::iter::once((None, 0.0))) {
                    x_perimeter += length(previous) + length(open) - 2.0 * overlap(previous, open);
                    previous = open;
                }
                (area, x_perimeter, y_perimeter)
            }
            _ => {
                let (w, h) = (x2 - x1, y2 - y1);
                (w * h, 2.0 * w, 2.0 * h)
            }
        };

        if area <= 0.0 {
            return None;
        }
        Some(ApertureScore {
            area,
            x_perimeter,
            y_perimeter,
            score: (self.x_weight * x_perimeter + self.y_weight * y_perimeter) / area,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::plan::{ControlPoint, DevicePositions};

    fn beam_with(mlc: Option<Vec<f64>>, boundaries: Vec<f64>) -> BeamRecord {
        BeamRecord {
            control_points: vec![ControlPoint {
                devices: DevicePositions {
                    jaw_x: Some([-50.0, 50.0]),
                    jaw_y: Some([-50.0, 50.0]),
                    mlc,
                },
                ..Default::default()
            }],
            leaf_boundaries: boundaries,
            ..Default::default()
        }
    }

    #[test]
    fn test_rectangular_mlc_aperture() {
        let beam = beam_with(Some(vec![-50.0, -50.0, 50.0, 50.0]), vec![-50.0, 0.0, 50.0]);
        let score = ApertureScorer::default().score(&beam, 0).unwrap();
        assert_eq!(score.area, 10000.0);
        assert_eq!(score.x_perimeter, 200.0);
        assert_eq!(score.y_perimeter, 200.0);
        assert!((score.score - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_staggered_leaves_lengthen_x_perimeter() {
        // lower row open -50..0, upper row open 0..50
        let beam = beam_with(Some(vec![-50.0, 0.0, 0.0, 50.0]), vec![-50.0, 0.0, 50.0]);
        let score = ApertureScorer::default().score(&beam, 0).unwrap();
        assert_eq!(score.area, 5000.0);
        assert_eq!(score.x_perimeter, 50.0 + 100.0 + 50.0);
        assert_eq!(score.y_perimeter, 200.0);
    }

    #[test]
    fn test_jaws_clip_leaves() {
        let mut beam = beam_with(Some(vec![-80.0, -80.0, 80.0, 80.0]), vec![-100.0, 0.0, 100.0]);
        beam.control_points[0].devices.jaw_y = Some([-20.0, 20.0]);
        let score = ApertureScorer::default().score(&beam, 0).unwrap();
        assert_eq!(score.area, 100.0 * 40.0);
        assert_eq!(score.y_perimeter, 80.0);
    }

    #[test]
    fn test_jaw_only_fallback_and_closed_aperture() {
        let beam = beam_with(None, vec![]);
        let score = ApertureScorer::new(2.0, 1.0).score(&beam, 0).unwrap();
        assert_eq!(score.area, 10000.0);
        assert!((score.score - (2.0 * 200.0 + 200.0) / 10000.0).abs() < 1e-12);

        let closed = beam_with(Some(vec![0.0, 0.0, 0.0, 0.0]), vec![-50.0, 0.0, 50.0]);
        assert!(ApertureScorer::default().score(&closed, 0).is_none());
        assert!(ApertureScorer::default().score(&closed, 5).is_none());
    }
}
