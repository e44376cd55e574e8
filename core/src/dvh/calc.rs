use crate::cancel::CancellationToken;
use crate::dose::{sample_bilinear, DoseGeometry, DoseGrid};
use crate::error::{DvhcatError, Result};
use crate::geometry::{ContourSlice, RoiContour};
use crate::types::ImportConfig;
use log::{debug, warn};
use ndarray::Array2;

use super::{DvhRecord, DvhResolution};

/// Upper bound on high resolution samples for a single ROI
const HIGH_RES_MAX_SAMPLES: usize = 50_000_000;

/// Outcome of a DVH calculation, including any fallback taken
#[derive(Debug, Clone, PartialEq)]
pub struct DvhCalculation {
    pub dvh: DvhRecord,
    pub warnings: Vec<String>,
}

/// Calculates the cumulative DVH of one ROI
///
/// Runs at the native dose grid sampling first. ROIs smaller than
/// `dvh_small_volume_cc` are recomputed on a subdivided, bilinearly
/// interpolated lattice; if that path exhausts its resources the standard
/// result is kept and a warning recorded.
///
/// # Errors
///
/// - `Geometry` when the dose grid is not axis aligned
/// - `Cancelled`
pub fn calculate_dvh(
    roi: &RoiContour,
    grid: &DoseGrid,
    config: &ImportConfig,
    cancel: &CancellationToken,
) -> Result<DvhCalculation> {
    if !grid.geometry.is_axis_aligned() {
        return Err(DvhcatError::Geometry(format!(
            "dose grid orientation {:?} is not supported",
            grid.geometry.orientation
        )));
    }

    let samples = standard_samples(roi, grid, cancel)?;
    let standard = DvhRecord::from_samples(&samples, config, DvhResolution::Standard);
    let mut warnings = Vec::new();

    if standard.volume >= config.dvh_small_volume_cc || config.dvh_high_res_factor <= 1 {
        return Ok(DvhCalculation {
            dvh: standard,
            warnings,
        });
    }

    debug!(
        "ROI volume {:.3} cc below {} cc; using high resolution DVH",
        standard.volume, config.dvh_small_volume_cc
    );
    match high_res_samples(roi, grid, config.dvh_high_res_factor, cancel) {
        Ok(samples) => Ok(DvhCalculation {
            dvh: DvhRecord::from_samples(&samples, config, DvhResolution::High),
            warnings,
        }),
        Err(DvhcatError::ResourceExhaustion(msg)) => {
            warn!("High resolution DVH failed, using standard resolution: {}", msg);
            warnings.push(format!("high resolution DVH unavailable: {}", msg));
            Ok(DvhCalculation {
                dvh: standard,
                warnings,
            })
        }
        Err(e) => Err(e),
    }
}

/// Inclusive integer index range of lattice points `origin + (k + shift)·step`
/// lying within `[lo, hi]`
fn index_range(lo: f64, hi: f64, origin: f64, step: f64, shift: f64) -> Option<(i64, i64)> {
    let first = ((lo - origin) / step - shift - 1e-9).ceil() as i64;
    let last = ((hi - origin) / step - shift + 1e-9).floor() as i64;
    (first <= last).then_some((first, last))
}

fn stored_dose(plane: Option<&Array2<f64>>, row: i64, col: i64) -> f64 {
    match plane {
        Some(plane) if row >= 0 && col >= 0 => plane
            .get([row as usize, col as usize])
            .copied()
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Dose at the slice centroid, used when no lattice point falls inside
fn centroid_sample(
    slice: &ContourSlice,
    plane: Option<&Array2<f64>>,
    geometry: &DoseGeometry,
) -> Option<(f64, f64)> {
    let [x, y] = slice.region.centroid()?;
    let dose = plane
        .map(|p| sample_bilinear(p.view(), geometry, x, y))
        .unwrap_or(0.0);
    Some((dose, slice.region.area() * slice.thickness))
}

/// `(dose Gy, volume mm³)` per dose pixel centre inside the ROI
fn standard_samples(
    roi: &RoiContour,
    grid: &DoseGrid,
    cancel: &CancellationToken,
) -> Result<Vec<(f64, f64)>> {
    let g = &grid.geometry;
    let pixel_area = g.spacing.pixel_area();
    let mut samples = Vec::new();

    for slice in roi.slices() {
        cancel.check()?;
        let plane = grid.plane_at(slice.z);
        let [min_x, min_y, max_x, max_y] = slice.region.bounds();
        let before = samples.len();

        if let (Some((c0, c1)), Some((r0, r1))) = (
            index_range(min_x, max_x, g.origin.x, g.spacing.col, 0.0),
            index_range(min_y, max_y, g.origin.y, g.spacing.row, 0.0),
        ) {
            for row in r0..=r1 {
                let y = g.origin.y + row as f64 * g.spacing.row;
                for col in c0..=c1 {
                    let x = g.origin.x + col as f64 * g.spacing.col;
                    if slice.region.contains([x, y]) {
                        let dose = stored_dose(plane.as_ref(), row, col);
                        samples.push((dose, pixel_area * slice.thickness));
                    }
                }
            }
        }

        if samples.len() == before {
            samples.extend(centroid_sample(slice, plane.as_ref(), g));
        }
    }
    Ok(samples)
}

/// Samples on a lattice subdividing each dose pixel `factor`² times
fn high_res_samples(
    roi: &RoiContour,
    grid: &DoseGrid,
    factor: usize,
    cancel: &CancellationToken,
) -> Result<Vec<(f64, f64)>> {
    let g = &grid.geometry;
    let f = factor as f64;
    let (step_x, step_y) = (g.spacing.col / f, g.spacing.row / f);
    // sub-pixel centres sit at pixel centre + ((j + 0.5)/f - 0.5)·spacing
    let shift = 0.5 - f / 2.0;
    let sub_origin_x = g.origin.x;
    let sub_origin_y = g.origin.y;

    let ranges: Vec<Option<((i64, i64), (i64, i64))>> = roi
        .slices()
        .iter()
        .map(|slice| {
            let [min_x, min_y, max_x, max_y] = slice.region.bounds();
            Some((
                index_range(min_x, max_x, sub_origin_x, step_x, shift)?,
                index_range(min_y, max_y, sub_origin_y, step_y, shift)?,
            ))
        })
        .collect();
    let estimate: usize = ranges
        .iter()
        .flatten()
        .map(|((c0, c1), (r0, r1))| ((c1 - c0 + 1) * (r1 - r0 + 1)) as usize)
        .sum();
    if estimate > HIGH_RES_MAX_SAMPLES {
        return Err(DvhcatError::ResourceExhaustion(format!(
            "{} high resolution samples exceed the limit of {}",
            estimate, HIGH_RES_MAX_SAMPLES
        )));
    }
    let mut samples: Vec<(f64, f64)> = Vec::new();
    samples.try_reserve(estimate).map_err(|e| {
        DvhcatError::ResourceExhaustion(format!("cannot reserve {} samples: {}", estimate, e))
    })?;

    let weight_area = g.spacing.pixel_area() / (f * f);
    for (slice, range) in roi.slices().iter().zip(ranges) {
        cancel.check()?;
        let plane = grid.plane_at(slice.z);
        let before = samples.len();

        if let Some(((c0, c1), (r0, r1))) = range {
            for row in r0..=r1 {
                let y = sub_origin_y + (row as f64 + shift) * step_y;
                for col in c0..=c1 {
                    let x = sub_origin_x + (col as f64 + shift) * step_x;
                    if slice.region.contains([x, y]) {
                        let dose = plane
                            .as_ref()
                            .map(|p| sample_bilinear(p.view(), g, x, y))
                            .unwrap_or(0.0);
                        samples.push((dose, weight_area * slice.thickness));
                    }
                }
            }
        }

        if samples.len() == before {
            samples.extend(centroid_sample(slice, plane.as_ref(), g));
        }
    }
    Ok(samples)
}
