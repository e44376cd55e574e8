use crate::error::{DvhcatError, Result};
use crate::types::{PixelSpacing, Point3};
use ndarray::{Array2, Array3, ArrayView2, Axis};

const IDENTITY_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

/// Voxel lattice of an RT Dose object
///
/// Frames run along z at `origin.z + frame_offsets[k]`; within a frame, row
/// `r` lies at `origin.y + r·spacing.row` and column `c` at
/// `origin.x + c·spacing.col`.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseGeometry {
    pub rows: usize,
    pub columns: usize,
    pub frames: usize,
    pub spacing: PixelSpacing,
    pub origin: Point3,
    pub orientation: [f64; 6],
    /// Relative to `origin.z`, mm
    pub frame_offsets: Vec<f64>,
}

impl DoseGeometry {
    pub fn voxel_count(&self) -> usize {
        self.rows * self.columns * self.frames
    }

    pub fn frame_len(&self) -> usize {
        self.rows * self.columns
    }

    pub fn x(&self, column: usize) -> f64 {
        self.origin.x + column as f64 * self.spacing.col
    }

    pub fn y(&self, row: usize) -> f64 {
        self.origin.y + row as f64 * self.spacing.row
    }

    pub fn z(&self, frame: usize) -> f64 {
        self.origin.z + self.frame_offsets.get(frame).copied().unwrap_or(0.0)
    }

    /// Distance between the first two frames, mm
    pub fn frame_spacing(&self) -> Option<f64> {
        match self.frame_offsets.as_slice() {
            [a, b, ..] => Some((b - a).abs()),
            _ => None,
        }
    }

    /// Whether rows run along +x and columns along +y
    pub fn is_axis_aligned(&self) -> bool {
        self.orientation
            .iter()
            .zip(IDENTITY_ORIENTATION.iter())
            .all(|(a, b)| (a - b).abs() < 1e-6)
    }

    /// Grid resolution as reported in plan rows, "col, row, frame" mm
    pub fn resolution_label(&self) -> String {
        match self.frame_spacing() {
            Some(dz) => format!("{}, {}, {}", self.spacing.col, self.spacing.row, dz),
            None => format!("{}, {}", self.spacing.col, self.spacing.row),
        }
    }

    /// Checks that `other` addresses exactly the same voxels
    ///
    /// # Errors
    ///
    /// Returns `GridMismatch` naming the first differing attribute
    pub fn check_compatible(&self, other: &DoseGeometry, tolerance: f64) -> Result<()> {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance;
        let mismatch = |what: &str| Err(DvhcatError::GridMismatch(format!("{} differs", what)));

        if (self.rows, self.columns, self.frames) != (other.rows, other.columns, other.frames) {
            return Err(DvhcatError::GridMismatch(format!(
                "shape {}x{}x{} vs {}x{}x{}",
                self.frames, self.rows, self.columns, other.frames, other.rows, other.columns
            )));
        }
        if !self.spacing.approx_eq(&other.spacing, tolerance) {
            return mismatch("pixel spacing");
        }
        if !(close(self.origin.x, other.origin.x)
            && close(self.origin.y, other.origin.y)
            && close(self.origin.z, other.origin.z))
        {
            return mismatch("origin");
        }
        if !self
            .orientation
            .iter()
            .zip(other.orientation.iter())
            .all(|(a, b)| (a - b).abs() < 1e-6)
        {
            return mismatch("orientation");
        }
        if !self
            .frame_offsets
            .iter()
            .zip(other.frame_offsets.iter())
            .all(|(a, b)| close(*a, *b))
        {
            return mismatch("frame offsets");
        }
        Ok(())
    }

    /// Fractional (row, column) of an in-plane position, if on the grid
    pub fn fractional_index(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let col = (x - self.origin.x) / self.spacing.col;
        let row = (y - self.origin.y) / self.spacing.row;
        let eps = 1e-6;
        let on_grid = |v: f64, n: usize| v >= -eps && v <= (n as f64 - 1.0) + eps;
        if on_grid(row, self.rows) && on_grid(col, self.columns) {
            Some((row.max(0.0), col.max(0.0)))
        } else {
            None
        }
    }
}

/// Materialized dose in Gy, indexed `[frame, row, column]`
#[derive(Debug, Clone, PartialEq)]
pub struct DoseGrid {
    pub geometry: DoseGeometry,
    pub values: Array3<f64>,
}

fn reserve(count: usize) -> Result<Vec<f64>> {
    let mut buffer: Vec<f64> = Vec::new();
    buffer.try_reserve_exact(count).map_err(|e| {
        DvhcatError::ResourceExhaustion(format!("cannot allocate {} dose voxels: {}", count, e))
    })?;
    Ok(buffer)
}

impl DoseGrid {
    /// Zero-filled grid
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhaustion` when the voxel buffer cannot be reserved
    pub fn zeros(geometry: DoseGeometry) -> Result<Self> {
        let count = geometry.voxel_count();
        let mut buffer = reserve(count)?;
        buffer.resize(count, 0.0);
        Self::from_vec(geometry, buffer)
    }

    /// Scales stored pixel values into a new grid
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhaustion` when the voxel buffer cannot be reserved
    pub fn from_stored(geometry: DoseGeometry, stored: &[u32], scaling: f64) -> Result<Self> {
        let mut buffer = reserve(stored.len())?;
        buffer.extend(stored.iter().map(|v| *v as f64 * scaling));
        Self::from_vec(geometry, buffer)
    }

    fn from_vec(geometry: DoseGeometry, buffer: Vec<f64>) -> Result<Self> {
        let shape = (geometry.frames, geometry.rows, geometry.columns);
        let values = Array3::from_shape_vec(shape, buffer)
            .map_err(|e| DvhcatError::InvalidValue(format!("dose grid shape: {}", e)))?;
        Ok(Self { geometry, values })
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Dose plane at axial position `z`, linearly interpolated between frames
    ///
    /// Returns `None` when `z` lies outside the frame range.
    pub fn plane_at(&self, z: f64) -> Option<Array2<f64>> {
        let frames = self.geometry.frames;
        let positions: Vec<f64> = (0..frames).map(|k| self.geometry.z(k)).collect();
        let eps = 1e-3;

        if let Some(k) = positions.iter().position(|p| (p - z).abs() <= eps) {
            return Some(self.values.index_axis(Axis(0), k).to_owned());
        }
        for k in 0..frames.saturating_sub(1) {
            let (z0, z1) = (positions[k], positions[k + 1]);
            let (lo, hi) = if z0 <= z1 { (z0, z1) } else { (z1, z0) };
            if z > lo && z < hi {
                let t = (z - z0) / (z1 - z0);
                let a = self.values.index_axis(Axis(0), k);
                let b = self.values.index_axis(Axis(0), k + 1);
                return Some(&a * (1.0 - t) + &b * t);
            }
        }
        None
    }
}

/// Bilinear sample of a dose plane at an in-plane position
///
/// Positions off the grid receive zero dose.
pub fn sample_bilinear(plane: ArrayView2<f64>, geometry: &DoseGeometry, x: f64, y: f64) -> f64 {
    let Some((row, col)) = geometry.fractional_index(x, y) else {
        return 0.0;
    };
    let (rows, cols) = plane.dim();
    let r0 = (row.floor() as usize).min(rows - 1);
    let c0 = (col.floor() as usize).min(cols - 1);
    let r1 = (r0 + 1).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);
    let (tr, tc) = (row - r0 as f64, col - c0 as f64);

    let top = plane[[r0, c0]] * (1.0 - tc) + plane[[r0, c1]] * tc;
    let bottom = plane[[r1, c0]] * (1.0 - tc) + plane[[r1, c1]] * tc;
    top * (1.0 - tr) + bottom * tr
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Axis-aligned 2.5 mm grid
    pub fn geometry(origin: [f64; 3], shape: (usize, usize, usize)) -> DoseGeometry {
        let (frames, rows, columns) = shape;
        DoseGeometry {
            rows,
            columns,
            frames,
            spacing: PixelSpacing::new(2.5, 2.5),
            origin: Point3::new(origin[0], origin[1], origin[2]),
            orientation: IDENTITY_ORIENTATION,
            frame_offsets: (0..frames).map(|k| k as f64 * 2.5).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::geometry;
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_positions() {
        let g = geometry([-5.0, -10.0, 20.0], (3, 4, 5));
        assert_eq!(g.voxel_count(), 60);
        assert_eq!(g.x(2), 0.0);
        assert_eq!(g.y(4), 0.0);
        assert_eq!(g.z(2), 25.0);
        assert_eq!(g.frame_spacing(), Some(2.5));
        assert_eq!(g.resolution_label(), "2.5, 2.5, 2.5");
        assert!(g.is_axis_aligned());
    }

    #[rstest]
    #[case::shape(geometry([0.0, 0.0, 0.0], (2, 2, 3)), false)]
    #[case::origin(geometry([0.5, 0.0, 0.0], (2, 2, 2)), false)]
    #[case::within_tolerance(geometry([0.0005, 0.0, 0.0], (2, 2, 2)), true)]
    #[case::same(geometry([0.0, 0.0, 0.0], (2, 2, 2)), true)]
    fn test_compatibility(#[case] other: DoseGeometry, #[case] compatible: bool) {
        let g = geometry([0.0, 0.0, 0.0], (2, 2, 2));
        let result = g.check_compatible(&other, 1e-3);
        assert_eq!(result.is_ok(), compatible);
        if !compatible {
            assert!(matches!(result, Err(DvhcatError::GridMismatch(_))));
        }
    }

    #[test]
    fn test_spacing_mismatch() {
        let g = geometry([0.0, 0.0, 0.0], (2, 2, 2));
        let mut other = g.clone();
        other.spacing = PixelSpacing::new(2.0, 2.5);
        assert!(g.check_compatible(&other, 1e-3).is_err());
    }

    #[test]
    fn test_plane_interpolation() {
        let g = geometry([0.0, 0.0, 0.0], (2, 1, 2));
        let grid = DoseGrid::from_stored(g, &[0, 2, 10, 12], 1.0).unwrap();
        let mid = grid.plane_at(1.25).unwrap();
        assert_eq!(mid[[0, 0]], 5.0);
        assert_eq!(mid[[0, 1]], 7.0);
        assert_eq!(grid.plane_at(2.5).unwrap()[[0, 1]], 12.0);
        assert!(grid.plane_at(-1.0).is_none());
        assert!(grid.plane_at(3.0).is_none());
        assert_eq!(grid.max(), 12.0);
    }

    #[test]
    fn test_bilinear_sampling() {
        let g = geometry([0.0, 0.0, 0.0], (1, 2, 2));
        let grid = DoseGrid::from_stored(g.clone(), &[0, 4, 8, 12], 1.0).unwrap();
        let plane = grid.values.index_axis(Axis(0), 0);
        assert_eq!(sample_bilinear(plane, &g, 1.25, 1.25), 6.0);
        assert_eq!(sample_bilinear(plane, &g, 2.5, 0.0), 4.0);
        assert_eq!(sample_bilinear(plane, &g, 10.0, 0.0), 0.0);
    }

    #[test]
    fn test_zeros() {
        let grid = DoseGrid::zeros(geometry([0.0, 0.0, 0.0], (2, 3, 4))).unwrap();
        assert_eq!(grid.values.dim(), (2, 3, 4));
        assert_eq!(grid.max(), 0.0);
    }
}
