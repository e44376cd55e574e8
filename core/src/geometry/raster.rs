use super::polygon::SliceRegion;

/// Cell centres of a regular lattice covering `bounds` at `step` mm
///
/// The lattice is anchored on the lower bound so that sampling is
/// reproducible for a given region.
pub fn lattice(bounds: [f64; 4], step: f64) -> impl Iterator<Item = [f64; 2]> {
    let [min_x, min_y, max_x, max_y] = bounds;
    let nx = if max_x > min_x { ((max_x - min_x) / step).ceil() as usize } else { 0 };
    let ny = if max_y > min_y { ((max_y - min_y) / step).ceil() as usize } else { 0 };
    (0..ny).flat_map(move |iy| {
        (0..nx).map(move |ix| {
            [
                min_x + (ix as f64 + 0.5) * step,
                min_y + (iy as f64 + 0.5) * step,
            ]
        })
    })
}

/// Fraction of `region` that also satisfies `inside`
///
/// Regions too small to hold a lattice point fall back to testing their
/// centroid.
pub fn covered_fraction(
    region: &SliceRegion,
    step: f64,
    inside: impl Fn([f64; 2]) -> bool,
) -> f64 {
    let mut total = 0usize;
    let mut covered = 0usize;
    for point in lattice(region.bounds(), step) {
        if region.contains(point) {
            total += 1;
            if inside(point) {
                covered += 1;
            }
        }
    }
    if total == 0 {
        return match region.centroid() {
            Some(c) if inside(c) => 1.0,
            _ => 0.0,
        };
    }
    covered as f64 / total as f64
}

/// Lattice points inside `region`, each with the area it stands for, mm²
///
/// A region too small to hold a lattice point is one sample at its centroid
/// carrying the region's own area rather than a full cell.
pub fn interior_samples(region: &SliceRegion, step: f64) -> Vec<([f64; 2], f64)> {
    let cell = step * step;
    let samples: Vec<([f64; 2], f64)> = lattice(region.bounds(), step)
        .filter(|p| region.contains(*p))
        .map(|p| (p, cell))
        .collect();
    if !samples.is_empty() {
        return samples;
    }
    match region.centroid() {
        Some(c) if region.area() > 0.0 => vec![(c, region.area())],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::polygon::fixtures::square;

    #[test]
    fn test_lattice_counts() {
        let points: Vec<_> = lattice([0.0, 0.0, 2.0, 1.0], 0.5).collect();
        assert_eq!(points.len(), 8);
        assert_eq!(points[0], [0.25, 0.25]);
        assert_eq!(lattice([0.0, 0.0, 0.0, 1.0], 0.5).count(), 0);
    }

    #[test]
    fn test_covered_fraction_half_overlap() {
        let region = SliceRegion::new(vec![square(0.0, 0.0, 10.0)]);
        let fraction = covered_fraction(&region, 0.5, |p| p[0] > 0.0);
        assert!((fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tiny_region_uses_centroid() {
        let region = SliceRegion::new(vec![square(0.0, 0.0, 0.1)]);
        assert_eq!(covered_fraction(&region, 5.0, |_| true), 1.0);
        let samples = interior_samples(&region, 5.0);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0, [0.0, 0.0]);
        // 0.2 mm square, not a 5 mm cell
        assert!((samples[0].1 - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_lattice_samples_carry_cell_area() {
        let region = SliceRegion::new(vec![square(0.0, 0.0, 2.0)]);
        let samples = interior_samples(&region, 1.0);
        assert_eq!(samples.len(), 16);
        let area: f64 = samples.iter().map(|(_, w)| w).sum();
        assert!((area - region.area()).abs() < 1e-9);
    }
}
