use crate::types::Point3;

/// Static k-d tree over 3-D points for nearest-neighbour queries
///
/// Points are stored in implicit tree order: the median of each sub-slice
/// is its node, split along x, y, z in turn.
#[derive(Debug, Clone)]
pub struct PointIndex {
    points: Vec<Point3>,
}

fn coord(p: &Point3, axis: usize) -> f64 {
    match axis {
        0 => p.x,
        1 => p.y,
        _ => p.z,
    }
}

fn build(points: &mut [Point3], depth: usize) {
    if points.len() <= 1 {
        return;
    }
    let axis = depth % 3;
    let mid = points.len() / 2;
    points.select_nth_unstable_by(mid, |a, b| coord(a, axis).total_cmp(&coord(b, axis)));
    let (left, right) = points.split_at_mut(mid);
    build(left, depth + 1);
    build(&mut right[1..], depth + 1);
}

fn search(points: &[Point3], query: &Point3, depth: usize, best: &mut f64) {
    if points.is_empty() {
        return;
    }
    let mid = points.len() / 2;
    let node = &points[mid];
    let d2 = node.distance_squared(query);
    if d2 < *best {
        *best = d2;
    }

    let axis = depth % 3;
    let diff = coord(query, axis) - coord(node, axis);
    let (near, far) = if diff < 0.0 {
        (&points[..mid], &points[mid + 1..])
    } else {
        (&points[mid + 1..], &points[..mid])
    };
    search(near, query, depth + 1, best);
    if diff * diff < *best {
        search(far, query, depth + 1, best);
    }
}

impl PointIndex {
    pub fn new(mut points: Vec<Point3>) -> Self {
        build(&mut points, 0);
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Distance from `query` to the closest indexed point
    pub fn nearest_distance(&self, query: &Point3) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let mut best = f64::INFINITY;
        search(&self.points, query, 0, &mut best);
        Some(best.sqrt())
    }
}

/// Keeps at most `max` points, evenly strided and deterministic
pub fn sample_evenly<T: Clone>(items: &[T], max: usize) -> Vec<T> {
    if items.len() <= max || max == 0 {
        return items.to_vec();
    }
    let stride = items.len() as f64 / max as f64;
    (0..max)
        .map(|i| items[((i as f64 * stride) as usize).min(items.len() - 1)].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(points: &[Point3], query: &Point3) -> f64 {
        points
            .iter()
            .map(|p| p.distance(query))
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        // deterministic pseudo-random cloud
        let mut seed = 17u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as f64 / (1u64 << 31) as f64) * 100.0 - 50.0
        };
        let points: Vec<Point3> = (0..500).map(|_| Point3::new(next(), next(), next())).collect();
        let queries: Vec<Point3> = (0..50).map(|_| Point3::new(next(), next(), next() * 4.0)).collect();

        let index = PointIndex::new(points.clone());
        assert_eq!(index.len(), 500);
        for q in &queries {
            let expected = brute_force(&points, q);
            let found = index.nearest_distance(q).unwrap();
            assert!((expected - found).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_index() {
        let index = PointIndex::new(vec![]);
        assert!(index.is_empty());
        assert!(index.nearest_distance(&Point3::default()).is_none());
    }

    #[test]
    fn test_sample_evenly() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(sample_evenly(&items, 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(sample_evenly(&items, 20).len(), 10);
    }
}
