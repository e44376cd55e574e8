use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::Point3;

use super::contour::RoiContour;
use super::index::PointIndex;
use super::raster::{covered_fraction, interior_samples};

/// Union of all target contours of a study
///
/// Serves as the reference surface for distances and overlap of every
/// non-target ROI.
#[derive(Debug, Clone)]
pub struct TargetReference {
    contours: Vec<RoiContour>,
    surface: PointIndex,
}

impl TargetReference {
    /// Builds the union; returns `None` when there are no target contours
    pub fn new(contours: Vec<RoiContour>) -> Option<Self> {
        if contours.is_empty() {
            return None;
        }
        // vertices buried inside another target are not on the union surface
        let mut surface = Vec::new();
        for (i, contour) in contours.iter().enumerate() {
            for point in contour.boundary_points() {
                let buried = contours
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.contains(&point));
                if !buried {
                    surface.push(point);
                }
            }
        }
        if surface.is_empty() {
            return None;
        }
        Some(Self {
            contours,
            surface: PointIndex::new(surface),
        })
    }

    pub fn contours(&self) -> &[RoiContour] {
        &self.contours
    }

    /// Whether a point lies inside any target
    pub fn contains(&self, point: &Point3) -> bool {
        self.contours.iter().any(|c| c.contains(point))
    }

    /// Signed distance to the target surface, mm; negative inside
    pub fn signed_distance(&self, point: &Point3) -> Option<f64> {
        let d = self.surface.nearest_distance(point)?;
        Some(if self.contains(point) { -d } else { d })
    }

    /// Volume of `roi` lying inside the target union, mm³
    pub fn overlap_volume_mm3(
        &self,
        roi: &RoiContour,
        step: f64,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        let mut total = 0.0;
        for slice in roi.slices() {
            cancel.check()?;
            let z = slice.z;
            let fraction = covered_fraction(&slice.region, step, |[x, y]| {
                self.contains(&Point3::new(x, y, z))
            });
            total += slice.region.area() * fraction * slice.thickness;
        }
        Ok(total)
    }

    /// Centroid of the union, sampled at `step` mm, counting overlaps once
    pub fn centroid(&self, step: f64, cancel: &CancellationToken) -> Result<Option<Point3>> {
        let mut total = 0.0;
        let mut acc = Point3::default();
        for (i, contour) in self.contours.iter().enumerate() {
            for slice in contour.slices() {
                cancel.check()?;
                for ([x, y], area) in interior_samples(&slice.region, step) {
                    let point = Point3::new(x, y, slice.z);
                    if self.contours[..i].iter().any(|c| c.contains(&point)) {
                        continue;
                    }
                    let weight = area * slice.thickness;
                    acc.x += x * weight;
                    acc.y += y * weight;
                    acc.z += slice.z * weight;
                    total += weight;
                }
            }
        }
        if total <= 0.0 {
            Ok(None)
        } else {
            Ok(Some(Point3::new(acc.x / total, acc.y / total, acc.z / total)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::contour::fixtures::prism;

    #[test]
    fn test_signed_distance() {
        let target = TargetReference::new(vec![prism(0.0, 0.0, 10.0, 0.0, 20.0, 2.5)]).unwrap();
        // outside, 5 mm beyond the +x face corner column
        let outside = target.signed_distance(&Point3::new(15.0, 10.0, 10.0)).unwrap();
        assert!((outside - 5.0).abs() < 1e-9);
        let inside = target.signed_distance(&Point3::new(0.0, 0.0, 10.0)).unwrap();
        assert!(inside < 0.0);
    }

    #[test]
    fn test_overlap_volume() {
        let target = TargetReference::new(vec![prism(0.0, 0.0, 10.0, 0.0, 20.0, 2.5)]).unwrap();
        // half of the ROI lies at x > 10, outside the target
        let roi = prism(10.0, 0.0, 5.0, 5.0, 15.0, 2.5);
        let cancel = CancellationToken::new();
        let overlap = target.overlap_volume_mm3(&roi, 0.25, &cancel).unwrap();
        assert!((overlap - roi.volume_mm3() / 2.0).abs() < 1e-6);

        let far = prism(100.0, 0.0, 5.0, 5.0, 15.0, 2.5);
        assert_eq!(target.overlap_volume_mm3(&far, 0.25, &cancel).unwrap(), 0.0);
    }

    #[test]
    fn test_union_counts_overlap_once() {
        let a = prism(-5.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        let b = prism(5.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        let target = TargetReference::new(vec![a, b]).unwrap();
        let centroid = target
            .centroid(1.0, &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!(centroid.x.abs() < 1e-9);
        assert!((centroid.z - 5.0).abs() < 1e-9);
        // a vertex of `a` inside `b` is not part of the union surface
        assert!(target.contains(&Point3::new(4.0, 0.0, 5.0)));
    }

    #[test]
    fn test_sub_cell_contour_weighs_its_area() {
        let body = prism(0.0, 0.0, 10.0, 0.0, 10.0, 2.5);
        // 0.2 mm square, far smaller than one 1 mm cell
        let speck = prism(100.0, 0.0, 0.1, 0.0, 10.0, 2.5);
        let target = TargetReference::new(vec![body, speck]).unwrap();
        let centroid = target
            .centroid(1.0, &CancellationToken::new())
            .unwrap()
            .unwrap();
        // 100 mm * 0.04 / 400.04 mm²
        assert!((centroid.x - 0.01).abs() < 1e-3);
    }

    #[test]
    fn test_empty_target() {
        assert!(TargetReference::new(vec![]).is_none());
    }
}
