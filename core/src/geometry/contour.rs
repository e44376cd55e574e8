use crate::cancel::CancellationToken;
use crate::error::{DvhcatError, Result};
use crate::types::{percentile_sorted, Point3};
use serde::{Deserialize, Serialize};

use super::polygon::{Ring, SliceRegion};
use super::raster::covered_fraction;

/// Rings of one ROI on one axial plane, as parsed
#[derive(Debug, Clone, PartialEq)]
pub struct ContourPlane {
    pub z: f64,
    pub rings: Vec<Ring>,
}

/// One axial slice of an ROI with the thickness it represents
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSlice {
    pub z: f64,
    pub thickness: f64,
    pub region: SliceRegion,
}

/// Slice-wise polygon model of one ROI, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct RoiContour {
    slices: Vec<ContourSlice>,
    spacing: f64,
}

/// Contour-derived geometry of one ROI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiMetrics {
    /// cm³
    pub volume: f64,
    /// cm², perimeter × thickness plus exposed caps
    pub surface_area: f64,
    /// mm
    pub centroid: Point3,
    /// cm, `[x, y, z]`
    pub spread: [f64; 3],
    /// cm²
    pub cross_section_max: f64,
    /// cm²
    pub cross_section_median: f64,
}

impl RoiContour {
    /// Builds the slice model from parsed planes
    ///
    /// Each slice is as thick as the gap to the next slice; the last slice
    /// and slices followed by a gap wider than 1.5 × the minimum spacing use
    /// the minimum spacing. A single-slice ROI takes `fallback_spacing`.
    ///
    /// # Errors
    ///
    /// Returns `Geometry` when no plane holds a usable ring, a coordinate is
    /// not finite or the slice thickness cannot be determined
    pub fn new(planes: Vec<ContourPlane>, fallback_spacing: Option<f64>) -> Result<Self> {
        let mut planes: Vec<ContourPlane> = planes;
        if planes
            .iter()
            .flat_map(|p| p.rings.iter().flatten())
            .any(|v| !v[0].is_finite() || !v[1].is_finite())
            || planes.iter().any(|p| !p.z.is_finite())
        {
            return Err(DvhcatError::Geometry("non-finite contour coordinate".to_string()));
        }

        planes.sort_by(|a, b| a.z.total_cmp(&b.z));
        let regions: Vec<(f64, SliceRegion)> = planes
            .into_iter()
            .map(|p| (p.z, SliceRegion::new(p.rings)))
            .filter(|(_, region)| !region.is_empty())
            .collect();
        if regions.is_empty() {
            return Err(DvhcatError::Geometry("ROI has no planar contours".to_string()));
        }

        let gaps: Vec<f64> = regions
            .windows(2)
            .map(|w| w[1].0 - w[0].0)
            .filter(|gap| *gap > 1e-6)
            .collect();
        let spacing = gaps
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, g| Some(acc.map_or(g, |a| a.min(g))))
            .or(fallback_spacing.filter(|s| *s > 0.0))
            .ok_or_else(|| DvhcatError::Geometry("slice thickness is unknown".to_string()))?;

        let thicknesses: Vec<f64> = (0..regions.len())
            .map(|i| match regions.get(i + 1) {
                Some(next) => {
                    let gap = next.0 - regions[i].0;
                    if gap > 1e-6 && gap <= 1.5 * spacing {
                        gap
                    } else {
                        spacing
                    }
                }
                None => spacing,
            })
            .collect();
        let slices = regions
            .into_iter()
            .zip(thicknesses)
            .map(|((z, region), thickness)| ContourSlice {
                z,
                thickness,
                region,
            })
            .collect();

        Ok(Self { slices, spacing })
    }

    pub fn slices(&self) -> &[ContourSlice] {
        &self.slices
    }

    /// Minimum slice spacing, mm
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Slice representing axial position `z`, if any
    pub fn slice_at(&self, z: f64) -> Option<&ContourSlice> {
        let idx = self.slices.partition_point(|s| s.z < z);
        [idx.checked_sub(1), Some(idx)]
            .into_iter()
            .flatten()
            .filter_map(|i| self.slices.get(i))
            .filter(|s| (s.z - z).abs() <= s.thickness / 2.0 + 1e-6)
            .min_by(|a, b| (a.z - z).abs().total_cmp(&(b.z - z).abs()))
    }

    /// Whether a 3-D point lies inside the ROI
    pub fn contains(&self, point: &Point3) -> bool {
        self.slice_at(point.z)
            .map(|s| s.region.contains([point.x, point.y]))
            .unwrap_or(false)
    }

    /// Volume, mm³
    pub fn volume_mm3(&self) -> f64 {
        self.slices
            .iter()
            .map(|s| s.region.area() * s.thickness)
            .sum()
    }

    /// Volume-weighted centroid of slice centroids, mm
    pub fn centroid(&self) -> Option<Point3> {
        let mut total = 0.0;
        let mut acc = Point3::default();
        for slice in &self.slices {
            let weight = slice.region.area() * slice.thickness;
            if let Some([x, y]) = slice.region.centroid() {
                acc.x += x * weight;
                acc.y += y * weight;
                acc.z += slice.z * weight;
                total += weight;
            }
        }
        if total <= 0.0 {
            None
        } else {
            Some(Point3::new(acc.x / total, acc.y / total, acc.z / total))
        }
    }

    /// Every contour vertex as a 3-D point
    pub fn boundary_points(&self) -> Vec<Point3> {
        self.slices
            .iter()
            .flat_map(|s| s.region.vertices().map(move |[x, y]| Point3::new(x, y, s.z)))
            .collect()
    }

    /// Extent along each axis, mm
    pub fn spread(&self) -> [f64; 3] {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for p in self.boundary_points() {
            for (axis, v) in [p.x, p.y, p.z].into_iter().enumerate() {
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
        }
        [max[0] - min[0], max[1] - min[1], max[2] - min[2]]
    }

    /// Surface area, mm²
    ///
    /// Lateral walls are perimeter × thickness. Each slice adds the part of
    /// its area not covered by the adjacent slice above and below; a side
    /// with no adjacent slice exposes the full area.
    pub fn surface_area_mm2(&self, step: f64, cancel: &CancellationToken) -> Result<f64> {
        let mut total = 0.0;
        for (i, slice) in self.slices.iter().enumerate() {
            cancel.check()?;
            total += slice.region.perimeter() * slice.thickness;

            let area = slice.region.area();
            let neighbours = [i.checked_sub(1), Some(i + 1)];
            for neighbour in neighbours {
                let adjacent = neighbour
                    .and_then(|j| self.slices.get(j))
                    .filter(|n| (n.z - slice.z).abs() <= 1.5 * self.spacing);
                let exposed = match adjacent {
                    Some(n) => {
                        area * (1.0 - covered_fraction(&slice.region, step, |p| n.region.contains(p)))
                    }
                    None => area,
                };
                total += exposed;
            }
        }
        Ok(total)
    }

    /// Areas of every polygon of every slice, mm²
    pub fn cross_sections(&self) -> Vec<f64> {
        self.slices
            .iter()
            .flat_map(|s| s.region.polygon_areas())
            .collect()
    }

    /// Computes all contour-derived metrics in report units
    pub fn metrics(&self, step: f64, cancel: &CancellationToken) -> Result<RoiMetrics> {
        let centroid = self
            .centroid()
            .ok_or_else(|| DvhcatError::Geometry("ROI has zero area".to_string()))?;
        let mut sections = self.cross_sections();
        sections.sort_by(f64::total_cmp);
        let spread = self.spread();

        Ok(RoiMetrics {
            volume: self.volume_mm3() / 1000.0,
            surface_area: self.surface_area_mm2(step, cancel)? / 100.0,
            centroid,
            spread: [spread[0] / 10.0, spread[1] / 10.0, spread[2] / 10.0],
            cross_section_max: sections.last().copied().unwrap_or(0.0) / 100.0,
            cross_section_median: percentile_sorted(&sections, 50.0) / 100.0,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::geometry::polygon::fixtures::square;

    /// Square prism centred on `(cx, cy)`, slices every `dz` from `z0` to `z1`
    pub fn prism(cx: f64, cy: f64, half: f64, z0: f64, z1: f64, dz: f64) -> RoiContour {
        RoiContour::new(prism_planes(cx, cy, half, z0, z1, dz), None).unwrap()
    }

    pub fn prism_planes(cx: f64, cy: f64, half: f64, z0: f64, z1: f64, dz: f64) -> Vec<ContourPlane> {
        let n = ((z1 - z0) / dz).round() as usize;
        (0..=n)
            .map(|i| ContourPlane {
                z: z0 + i as f64 * dz,
                rings: vec![square(cx, cy, half)],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::geometry::polygon::fixtures::square;

    #[test]
    fn test_prism_volume_and_centroid() {
        // 20 mm square, 5 slices 2.5 mm apart: each slice is 2.5 mm thick
        let roi = prism(0.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        assert_eq!(roi.slices().len(), 5);
        assert!((roi.volume_mm3() - 400.0 * 12.5).abs() < 1e-9);
        let c = roi.centroid().unwrap();
        assert!(c.x.abs() < 1e-9 && c.y.abs() < 1e-9);
        assert!((c.z - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_units() {
        let roi = prism(0.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        let metrics = roi.metrics(0.5, &CancellationToken::new()).unwrap();
        assert!((metrics.volume - 5.0).abs() < 1e-9);
        assert_eq!(metrics.spread, [2.0, 2.0, 1.0]);
        assert!((metrics.cross_section_max - 4.0).abs() < 1e-9);
        assert!((metrics.cross_section_median - 4.0).abs() < 1e-9);
        // walls 80 mm × 12.5 mm plus two exposed 400 mm² caps
        assert!((metrics.surface_area - (1000.0 + 800.0) / 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_gap_does_not_inflate_thickness() {
        let mut planes = prism_planes(0.0, 0.0, 5.0, 0.0, 5.0, 2.5);
        planes.push(ContourPlane {
            z: 50.0,
            rings: vec![square(0.0, 0.0, 5.0)],
        });
        let roi = RoiContour::new(planes, None).unwrap();
        let thicknesses: Vec<f64> = roi.slices().iter().map(|s| s.thickness).collect();
        assert_eq!(thicknesses, vec![2.5, 2.5, 2.5, 2.5]);
    }

    #[test]
    fn test_single_slice_uses_fallback() {
        let planes = vec![ContourPlane {
            z: 0.0,
            rings: vec![square(0.0, 0.0, 5.0)],
        }];
        assert!(matches!(
            RoiContour::new(planes.clone(), None),
            Err(DvhcatError::Geometry(_))
        ));
        let roi = RoiContour::new(planes, Some(3.0)).unwrap();
        assert_eq!(roi.volume_mm3(), 300.0);
    }

    #[test]
    fn test_empty_roi_is_geometry_error() {
        let planes = vec![ContourPlane {
            z: 0.0,
            rings: vec![vec![[0.0, 0.0]]],
        }];
        assert!(matches!(
            RoiContour::new(planes, Some(2.0)),
            Err(DvhcatError::Geometry(_))
        ));
        assert!(RoiContour::new(vec![], Some(2.0)).is_err());
    }

    #[test]
    fn test_contains_and_slice_lookup() {
        let roi = prism(0.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        assert!(roi.contains(&Point3::new(0.0, 0.0, 6.0)));
        assert!(!roi.contains(&Point3::new(0.0, 0.0, 20.0)));
        assert!(!roi.contains(&Point3::new(15.0, 0.0, 5.0)));
        assert_eq!(roi.slice_at(4.9).map(|s| s.z), Some(5.0));
    }

    #[test]
    fn test_cancelled_surface_area() {
        let roi = prism(0.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            roi.surface_area_mm2(0.5, &cancel),
            Err(DvhcatError::Cancelled)
        ));
    }
}
