//! 3-D affine transforms in homogeneous `(x, y, z, 1)` coordinates.

use serde::{Deserialize, Serialize};

/// A 4x4 affine matrix acting on column vectors `(x, y, z, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffineTransform3D {
    matrix: [[f64; 4]; 4],
}

impl Default for AffineTransform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform3D {
    /// The identity transform.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Wrap a raw matrix. The last row must be `[0, 0, 0, 1]`.
    ///
    /// # Errors
    ///
    /// Fails if the matrix is not affine or contains non-finite values.
    pub fn from_matrix(matrix: [[f64; 4]; 4]) -> Result<Self, String> {
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err("affine matrix contains non-finite values".to_owned());
        }
        if matrix[3] != [0.0, 0.0, 0.0, 1.0] {
            return Err("last row of an affine matrix must be [0, 0, 0, 1]".to_owned());
        }
        Ok(Self { matrix })
    }

    /// Raw matrix.
    #[must_use]
    pub const fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.matrix
    }

    /// `self` followed by `next`, i.e. `next * self`.
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| next.matrix[r][k] * self.matrix[k][c]).sum();
            }
        }
        Self { matrix: out }
    }

    /// Append a translation.
    #[must_use]
    pub fn translate(&self, tx: f64, ty: f64, tz: f64) -> Self {
        let mut t = Self::identity();
        t.matrix[0][3] = tx;
        t.matrix[1][3] = ty;
        t.matrix[2][3] = tz;
        self.then(&t)
    }

    /// Append an axis-aligned scaling.
    #[must_use]
    pub fn scale(&self, sx: f64, sy: f64, sz: f64) -> Self {
        let mut t = Self::identity();
        t.matrix[0][0] = sx;
        t.matrix[1][1] = sy;
        t.matrix[2][2] = sz;
        self.then(&t)
    }

    /// Append a shear that adds `factor * z` to `y`.
    #[must_use]
    pub fn shear_y_by_z(&self, factor: f64) -> Self {
        let mut t = Self::identity();
        t.matrix[1][2] = factor;
        self.then(&t)
    }

    /// Append a shear that adds `factor * z` to `x`.
    #[must_use]
    pub fn shear_x_by_z(&self, factor: f64) -> Self {
        let mut t = Self::identity();
        t.matrix[0][2] = factor;
        self.then(&t)
    }

    /// Append a rotation about the X axis (rotates the Y-Z plane).
    #[must_use]
    pub fn rotate_about_x(&self, degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let mut t = Self::identity();
        t.matrix[1][1] = cos;
        t.matrix[1][2] = -sin;
        t.matrix[2][1] = sin;
        t.matrix[2][2] = cos;
        self.then(&t)
    }

    /// Append a rotation about the Y axis (rotates the X-Z plane).
    #[must_use]
    pub fn rotate_about_y(&self, degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let mut t = Self::identity();
        t.matrix[0][0] = cos;
        t.matrix[0][2] = sin;
        t.matrix[2][0] = -sin;
        t.matrix[2][2] = cos;
        self.then(&t)
    }

    /// Map a point `(x, y, z)`.
    #[must_use]
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        let [x, y, z] = point;
        [
            m[0][3] + m[0][2].mul_add(z, m[0][0].mul_add(x, m[0][1] * y)),
            m[1][3] + m[1][2].mul_add(z, m[1][0].mul_add(x, m[1][1] * y)),
            m[2][3] + m[2][2].mul_add(z, m[2][0].mul_add(x, m[2][1] * y)),
        ]
    }

    /// Inverse transform, or `None` if the linear part is singular.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.matrix;
        let a = [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ];
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            a[r0][c0].mul_add(a[r1][c1], -(a[r0][c1] * a[r1][c0]))
        };
        let det = a[0][0].mul_add(
            cof(1, 2, 1, 2),
            a[0][1].mul_add(-cof(1, 2, 0, 2), a[0][2] * cof(1, 2, 0, 1)),
        );
        if det.abs() < f64::EPSILON {
            return None;
        }
        let inv = [
            [cof(1, 2, 1, 2) / det, -cof(0, 2, 1, 2) / det, cof(0, 1, 1, 2) / det],
            [-cof(1, 2, 0, 2) / det, cof(0, 2, 0, 2) / det, -cof(0, 1, 0, 2) / det],
            [cof(1, 2, 0, 1) / det, -cof(0, 2, 0, 1) / det, cof(0, 1, 0, 1) / det],
        ];
        let t = [m[0][3], m[1][3], m[2][3]];
        let mut matrix = Self::identity().matrix;
        for r in 0..3 {
            matrix[r][..3].copy_from_slice(&inv[r]);
            matrix[r][3] = -(0..3).map(|k| inv[r][k] * t[k]).sum::<f64>();
        }
        Some(Self { matrix })
    }
}
