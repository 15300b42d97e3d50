//! Affine fit between pixel displacements and stage positions.
//!
//! The canonical direction is pixel displacement → absolute stage position:
//! ```text
//! stage_x = a * dx + b * dy + c
//! stage_y = d * dx + e * dy + f
//! ```
//! which answers "where must the stage be to see this much image shift".
//! Use [`AffineTransform::inverse`] for the stage → pixel direction.

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest accepted ratio of the smallest to the largest singular value of
/// the (centred) pixel design matrix. Anything below is treated as rank
/// deficient: a point set 100 px long must spread at least 1e-4 px across.
pub const MIN_RECIPROCAL_CONDITION: f64 = 1e-6;

/// Errors produced while fitting or inverting an affine transform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AffineFitError {
    /// Too few points, or the points are (nearly) collinear
    #[error(
        "underdetermined system: {points} correspondence points span rank {rank}"
    )]
    UnderdeterminedSystem { points: usize, rank: usize },

    /// The linear part cannot be inverted
    #[error("singular linear part (determinant {determinant:e})")]
    Singular { determinant: f64 },

    /// SVD did not produce the factors needed for a solve
    #[error("SVD solve failed: {0}")]
    SvdFailed(String),
}

/// One observation: the pixel displacement (relative to the reference image)
/// seen while the stage sat at an absolute position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrespondencePoint {
    /// Observed X displacement in pixels
    pub pixel_dx: f64,
    /// Observed Y displacement in pixels
    pub pixel_dy: f64,
    /// Absolute stage X position in stage units
    pub stage_x: f64,
    /// Absolute stage Y position in stage units
    pub stage_y: f64,
}

impl CorrespondencePoint {
    pub fn new(pixel_dx: f64, pixel_dy: f64, stage_x: f64, stage_y: f64) -> Self {
        Self {
            pixel_dx,
            pixel_dy,
            stage_x,
            stage_y,
        }
    }

    /// Build from nalgebra vectors
    pub fn from_vectors(pixel: Vector2<f64>, stage: Vector2<f64>) -> Self {
        Self::new(pixel.x, pixel.y, stage.x, stage.y)
    }

    pub fn pixel(&self) -> Vector2<f64> {
        Vector2::new(self.pixel_dx, self.pixel_dy)
    }

    pub fn stage(&self) -> Vector2<f64> {
        Vector2::new(self.stage_x, self.stage_y)
    }
}

/// 2×3 affine map from pixel displacement to absolute stage position.
///
/// Stored row-major as `[[a, b, c], [d, e, f]]`. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    rows: [[f64; 3]; 2],
}

impl AffineTransform {
    /// Create from the six coefficients of `[a b c; d e f]`
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self {
            rows: [[a, b, c], [d, e, f]],
        }
    }

    /// Create from a linear part and a translation
    pub fn from_parts(linear: Matrix2<f64>, translation: Vector2<f64>) -> Self {
        Self::new(
            linear[(0, 0)],
            linear[(0, 1)],
            translation.x,
            linear[(1, 0)],
            linear[(1, 1)],
            translation.y,
        )
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Row-major coefficients `[[a, b, c], [d, e, f]]`
    pub fn coefficients(&self) -> [[f64; 3]; 2] {
        self.rows
    }

    /// The 2×2 linear part (columns are stage motion per pixel along x and y)
    pub fn linear(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.rows[0][0],
            self.rows[0][1],
            self.rows[1][0],
            self.rows[1][1],
        )
    }

    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.rows[0][2], self.rows[1][2])
    }

    /// Map a pixel displacement to an absolute stage position
    pub fn apply(&self, dx: f64, dy: f64) -> (f64, f64) {
        let out = self.apply_vector(Vector2::new(dx, dy));
        (out.x, out.y)
    }

    pub fn apply_vector(&self, pixel: Vector2<f64>) -> Vector2<f64> {
        self.linear() * pixel + self.translation()
    }

    /// Map a pixel displacement to a stage displacement (no translation)
    pub fn apply_linear(&self, dx: f64, dy: f64) -> (f64, f64) {
        let out = self.linear() * Vector2::new(dx, dy);
        (out.x, out.y)
    }

    /// Inverse map: absolute stage position → pixel displacement
    pub fn inverse(&self) -> Result<AffineTransform, AffineFitError> {
        let linear = self.linear();
        let inverse = linear
            .try_inverse()
            .filter(|m| m.iter().all(|v| v.is_finite()))
            .ok_or(AffineFitError::Singular {
                determinant: linear.determinant(),
            })?;
        Ok(Self::from_parts(inverse, -(inverse * self.translation())))
    }

    /// Stage units per pixel along the pixel x and y axes (column norms)
    pub fn scale(&self) -> (f64, f64) {
        let linear = self.linear();
        (linear.column(0).norm(), linear.column(1).norm())
    }

    /// Effective pixel size in stage units: mean of the two column norms
    pub fn pixel_size(&self) -> f64 {
        let (sx, sy) = self.scale();
        (sx + sy) / 2.0
    }

    /// Rotation of the pixel x axis in stage space, radians.
    ///
    /// `atan2(d, a)`; only meaningful when skew is small.
    pub fn rotation(&self) -> f64 {
        self.rows[1][0].atan2(self.rows[0][0])
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation().to_degrees()
    }

    /// Deviation of the angle between the two columns from 90°, radians
    pub fn skew(&self) -> f64 {
        let linear = self.linear();
        let (u, v) = (linear.column(0), linear.column(1));
        let norms = u.norm() * v.norm();
        if norms == 0.0 {
            return 0.0;
        }
        (u.dot(&v) / norms).clamp(-1.0, 1.0).asin()
    }

    /// RMS distance in stage units between predicted and observed positions
    pub fn rms_residual(&self, points: &[CorrespondencePoint]) -> Option<f64> {
        if points.is_empty() {
            return None;
        }
        let sum_sq: f64 = points
            .iter()
            .map(|p| (self.apply_vector(p.pixel()) - p.stage()).norm_squared())
            .sum();
        Some((sum_sq / points.len() as f64).sqrt())
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Number of singular values that are significant relative to the largest
fn effective_rank(singular_values: &DVector<f64>) -> usize {
    let max = singular_values.iter().cloned().fold(0.0_f64, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return 0;
    }
    singular_values
        .iter()
        .filter(|&&s| s >= max * MIN_RECIPROCAL_CONDITION)
        .count()
}

fn mean_of(points: &[CorrespondencePoint], f: impl Fn(&CorrespondencePoint) -> Vector2<f64>) -> Vector2<f64> {
    points.iter().map(f).sum::<Vector2<f64>>() / points.len() as f64
}

/// `n × 2` design matrix of pixel displacements, each shifted by `origin`
fn pixel_design(points: &[CorrespondencePoint], origin: Vector2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(points.len(), 2, |row, col| points[row].pixel()[col] - origin[col])
}

/// Solve `design · [m0, m1]ᵀ ≈ targets` for both stage axes and stack the
/// solutions as the rows of a 2×2 matrix.
fn solve_linear(
    points: &[CorrespondencePoint],
    pixel_origin: Vector2<f64>,
    stage_origin: Vector2<f64>,
    min_points: usize,
    rank_offset: usize,
) -> Result<Matrix2<f64>, AffineFitError> {
    let n = points.len();
    let svd = pixel_design(points, pixel_origin).svd(true, true);
    let rank = effective_rank(&svd.singular_values) + rank_offset;
    if n < min_points || rank < min_points {
        return Err(AffineFitError::UnderdeterminedSystem { points: n, rank });
    }

    let bx = DVector::from_iterator(n, points.iter().map(|p| p.stage_x - stage_origin.x));
    let by = DVector::from_iterator(n, points.iter().map(|p| p.stage_y - stage_origin.y));
    let row_x = svd
        .solve(&bx, 0.0)
        .map_err(|e| AffineFitError::SvdFailed(e.to_string()))?;
    let row_y = svd
        .solve(&by, 0.0)
        .map_err(|e| AffineFitError::SvdFailed(e.to_string()))?;

    Ok(Matrix2::new(row_x[0], row_x[1], row_y[0], row_y[1]))
}

/// Least-squares fit of `M · [dx, dy, 1]ᵀ ≈ [sx, sy]ᵀ` over all points.
///
/// Point order does not matter. Needs at least 3 non-collinear points.
/// The linear part is solved on pixel displacements centred on their mean,
/// so the collinearity check compares the spread across the dominant
/// direction with the spread along it, independent of where the points sit.
/// A spread ratio below [`MIN_RECIPROCAL_CONDITION`] is reported as
/// [`AffineFitError::UnderdeterminedSystem`].
pub fn fit_affine(points: &[CorrespondencePoint]) -> Result<AffineTransform, AffineFitError> {
    if points.is_empty() {
        return Err(AffineFitError::UnderdeterminedSystem { points: 0, rank: 0 });
    }

    let pixel_mean = mean_of(points, CorrespondencePoint::pixel);
    let stage_mean = mean_of(points, CorrespondencePoint::stage);
    // The centred columns are orthogonal to the constant column, which adds one to the rank
    let linear = solve_linear(points, pixel_mean, stage_mean, 3, 1)?;

    Ok(AffineTransform::from_parts(
        linear,
        stage_mean - linear * pixel_mean,
    ))
}

/// Least-squares fit of `stage = M · pixel` with no translation term.
///
/// For displacement pairs measured from a common origin: both the pixel
/// and the stage coordinates of each point must already be relative to
/// it. Needs at least 2 points in independent pixel directions.
pub fn fit_linear(points: &[CorrespondencePoint]) -> Result<Matrix2<f64>, AffineFitError> {
    if points.is_empty() {
        return Err(AffineFitError::UnderdeterminedSystem { points: 0, rank: 0 });
    }
    solve_linear(points, Vector2::zeros(), Vector2::zeros(), 2, 0)
}
