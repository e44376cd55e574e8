/// Closed ring of in-plane vertices `[x, y]`, mm; the closing edge is implied
pub type Ring = Vec<[f64; 2]>;

/// Signed shoelace area; positive for counter-clockwise rings
pub fn signed_area(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let [x0, y0] = ring[i];
        let [x1, y1] = ring[(i + 1) % ring.len()];
        sum += x0 * y1 - x1 * y0;
    }
    sum / 2.0
}

/// Area centroid of a simple ring
///
/// Falls back to the vertex mean when the ring has no area.
pub fn ring_centroid(ring: &[[f64; 2]]) -> [f64; 2] {
    let area = signed_area(ring);
    if area.abs() < 1e-12 {
        let n = ring.len().max(1) as f64;
        let sx: f64 = ring.iter().map(|p| p[0]).sum();
        let sy: f64 = ring.iter().map(|p| p[1]).sum();
        return [sx / n, sy / n];
    }
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..ring.len() {
        let [x0, y0] = ring[i];
        let [x1, y1] = ring[(i + 1) % ring.len()];
        let cross = x0 * y1 - x1 * y0;
        cx += (x0 + x1) * cross;
        cy += (y0 + y1) * cross;
    }
    [cx / (6.0 * area), cy / (6.0 * area)]
}

/// Length of the closed ring boundary
pub fn perimeter(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 2 {
        return 0.0;
    }
    (0..ring.len())
        .map(|i| {
            let [x0, y0] = ring[i];
            let [x1, y1] = ring[(i + 1) % ring.len()];
            ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
        })
        .sum()
}

/// Even-odd ray crossing test
pub fn ring_contains(ring: &[[f64; 2]], point: [f64; 2]) -> bool {
    let [px, py] = point;
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Axis-aligned bounds `[min_x, min_y, max_x, max_y]`
pub fn bounds(ring: &[[f64; 2]]) -> [f64; 4] {
    ring.iter().fold(
        [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
        |b, p| [b[0].min(p[0]), b[1].min(p[1]), b[2].max(p[0]), b[3].max(p[1])],
    )
}

/// All rings of one ROI on one axial plane, combined by the even-odd rule
///
/// A ring nested inside an odd number of other rings is a hole. Rings are
/// assumed not to cross each other.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRegion {
    rings: Vec<Ring>,
    depths: Vec<usize>,
    bounds: [f64; 4],
}

impl SliceRegion {
    /// Builds a region, dropping rings with fewer than three vertices
    pub fn new(rings: Vec<Ring>) -> Self {
        let rings: Vec<Ring> = rings.into_iter().filter(|r| r.len() >= 3).collect();
        let depths = rings
            .iter()
            .enumerate()
            .map(|(i, ring)| {
                rings
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| *j != i && ring_contains(other, ring[0]))
                    .count()
            })
            .collect();
        let bounds = rings.iter().map(|r| bounds(r)).fold(
            [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])],
        );
        Self {
            rings,
            depths,
            bounds,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    pub fn bounds(&self) -> [f64; 4] {
        self.bounds
    }

    /// Even-odd containment over all rings
    pub fn contains(&self, point: [f64; 2]) -> bool {
        let [min_x, min_y, max_x, max_y] = self.bounds;
        if point[0] < min_x || point[0] > max_x || point[1] < min_y || point[1] > max_y {
            return false;
        }
        self.rings
            .iter()
            .filter(|ring| ring_contains(ring, point))
            .count()
            % 2
            == 1
    }

    /// Region area, holes subtracted, mm²
    pub fn area(&self) -> f64 {
        self.rings
            .iter()
            .zip(&self.depths)
            .map(|(ring, depth)| {
                let a = signed_area(ring).abs();
                if depth % 2 == 0 {
                    a
                } else {
                    -a
                }
            })
            .sum::<f64>()
            .max(0.0)
    }

    /// Area-weighted centroid, holes subtracted
    pub fn centroid(&self) -> Option<[f64; 2]> {
        let mut total = 0.0;
        let (mut cx, mut cy) = (0.0, 0.0);
        for (ring, depth) in self.rings.iter().zip(&self.depths) {
            let sign = if depth % 2 == 0 { 1.0 } else { -1.0 };
            let a = signed_area(ring).abs() * sign;
            let [rx, ry] = ring_centroid(ring);
            cx += rx * a;
            cy += ry * a;
            total += a;
        }
        if total.abs() < 1e-12 {
            None
        } else {
            Some([cx / total, cy / total])
        }
    }

    /// Total boundary length including holes, mm
    pub fn perimeter(&self) -> f64 {
        self.rings.iter().map(|r| perimeter(r)).sum()
    }

    /// Area of each outer polygon with its direct holes removed, mm²
    pub fn polygon_areas(&self) -> Vec<f64> {
        self.rings
            .iter()
            .zip(&self.depths)
            .filter(|(_, depth)| *depth % 2 == 0)
            .map(|(outer, depth)| {
                let holes: f64 = self
                    .rings
                    .iter()
                    .zip(&self.depths)
                    .filter(|(ring, d)| **d == depth + 1 && ring_contains(outer, ring[0]))
                    .map(|(ring, _)| signed_area(ring).abs())
                    .sum();
                (signed_area(outer).abs() - holes).max(0.0)
            })
            .collect()
    }

    /// Every vertex of every ring
    pub fn vertices(&self) -> impl Iterator<Item = [f64; 2]> + '_ {
        self.rings.iter().flat_map(|r| r.iter().copied())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Ring;

    /// Axis-aligned square centred on `(cx, cy)`
    pub fn square(cx: f64, cy: f64, half: f64) -> Ring {
        vec![
            [cx - half, cy - half],
            [cx + half, cy - half],
            [cx + half, cy + half],
            [cx - half, cy + half],
        ]
    }
}
