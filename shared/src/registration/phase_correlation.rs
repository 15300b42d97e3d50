//! Phase correlation between two equally sized images.
//!
//! 1. 2D FFT of reference and target (row-column decomposition)
//! 2. Normalized cross-power spectrum `F_t · conj(F_r) / (|F_t · conj(F_r)| + eps)`
//! 3. Inverse FFT, magnitude, re-centered so zero shift sits at `(rows/2, cols/2)`
//! 4. Global peak plus parabolic sub-pixel refinement
//!
//! The peak sits at the displacement of the target's content relative to
//! the reference: a target wrap-shifted by `(dx, dy)` registers as `(dx, dy)`.

use super::subpixel::refine_peak;
use super::{DisplacementEstimate, RegistrationError};
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::trace;

/// Regularization added to the cross-power magnitude
pub const DEFAULT_EPS: f64 = 1e-10;

/// Phase correlator with FFT plans cached for one image shape.
pub struct PhaseCorrelator {
    rows: usize,
    cols: usize,
    eps: f64,
    /// Plans for transforms along a row (length `cols`)
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    /// Plans for transforms along a column (length `rows`)
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for PhaseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseCorrelator")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("eps", &self.eps)
            .finish()
    }
}

impl PhaseCorrelator {
    /// Plan transforms for images of `shape = (rows, cols)`.
    pub fn new(shape: (usize, usize), eps: f64) -> Result<Self, RegistrationError> {
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            return Err(RegistrationError::EmptyImage);
        }

        let mut planner = FftPlanner::new();
        Ok(Self {
            rows,
            cols,
            eps,
            row_forward: planner.plan_fft_forward(cols),
            row_inverse: planner.plan_fft_inverse(cols),
            col_forward: planner.plan_fft_forward(rows),
            col_inverse: planner.plan_fft_inverse(rows),
        })
    }

    /// `(rows, cols)` this correlator was planned for
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Estimate the displacement of `target` relative to `reference`.
    pub fn correlate(
        &self,
        reference: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> Result<DisplacementEstimate, RegistrationError> {
        let surface = self.correlation_surface(reference, target)?;
        let (peak_row, peak_col, confidence) = find_peak(&surface);
        let (sub_row, sub_col) = refine_peak(surface.view(), peak_row, peak_col);

        let shift_y = peak_row as f64 - (self.rows / 2) as f64 + sub_row;
        let shift_x = peak_col as f64 - (self.cols / 2) as f64 + sub_col;
        trace!(
            peak_row,
            peak_col,
            shift_x,
            shift_y,
            confidence,
            "phase correlation peak"
        );

        Ok(DisplacementEstimate {
            shift_x,
            shift_y,
            confidence,
        })
    }

    /// Re-centered magnitude of the phase correlation surface.
    ///
    /// Index `(rows/2, cols/2)` corresponds to zero displacement.
    pub fn correlation_surface(
        &self,
        reference: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> Result<Array2<f64>, RegistrationError> {
        if reference.dim() != target.dim() {
            return Err(RegistrationError::DimensionMismatch {
                reference: reference.dim(),
                target: target.dim(),
            });
        }
        if reference.is_empty() {
            return Err(RegistrationError::EmptyImage);
        }
        if reference.dim() != self.shape() {
            return Err(RegistrationError::DimensionMismatch {
                reference: self.shape(),
                target: reference.dim(),
            });
        }

        let reference_spectrum = self.fft_2d(reference);
        let mut cross_power = self.fft_2d(target);
        self.cross_power_spectrum(&reference_spectrum, &mut cross_power);
        let correlation = self.ifft_2d(cross_power);

        Ok(fftshift(&correlation))
    }

    fn fft_2d(&self, image: ArrayView2<f64>) -> Array2<Complex<f64>> {
        // from_shape_fn always yields standard (row-major) layout
        let mut data =
            Array2::from_shape_fn(image.dim(), |(r, c)| Complex::new(image[[r, c]], 0.0));
        self.transform(&mut data, &*self.row_forward, &*self.col_forward);
        data
    }

    /// Inverse transform, normalized, magnitude
    fn ifft_2d(&self, mut data: Array2<Complex<f64>>) -> Array2<f64> {
        self.transform(&mut data, &*self.row_inverse, &*self.col_inverse);
        let norm = 1.0 / (self.rows * self.cols) as f64;
        data.mapv(|c| c.norm() * norm)
    }

    /// Row transforms, transpose, column transforms, transpose back
    fn transform(
        &self,
        data: &mut Array2<Complex<f64>>,
        along_row: &dyn Fft<f64>,
        along_col: &dyn Fft<f64>,
    ) {
        process_rows(data, along_row);
        let mut transposed = data.t().as_standard_layout().into_owned();
        process_rows(&mut transposed, along_col);
        *data = transposed.t().as_standard_layout().into_owned();
    }

    /// Overwrites `target` with the normalized cross-power spectrum
    fn cross_power_spectrum(
        &self,
        reference: &Array2<Complex<f64>>,
        target: &mut Array2<Complex<f64>>,
    ) {
        let eps = self.eps;
        ndarray::Zip::from(target)
            .and(reference)
            .par_for_each(|t, &r| {
                let product = *t * r.conj();
                *t = product / (product.norm() + eps);
            });
    }
}

/// One-shot registration with freshly planned transforms.
pub fn estimate_shift(
    reference: ArrayView2<f64>,
    target: ArrayView2<f64>,
    eps: f64,
) -> Result<DisplacementEstimate, RegistrationError> {
    if reference.dim() != target.dim() {
        return Err(RegistrationError::DimensionMismatch {
            reference: reference.dim(),
            target: target.dim(),
        });
    }
    PhaseCorrelator::new(reference.dim(), eps)?.correlate(reference, target)
}

fn process_rows(data: &mut Array2<Complex<f64>>, fft: &dyn Fft<f64>) {
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| match row.as_slice_mut() {
            Some(slice) => fft.process(slice),
            None => {
                let mut buffer = row.to_vec();
                fft.process(&mut buffer);
                row.iter_mut().zip(buffer).for_each(|(dst, src)| *dst = src);
            }
        });
}

/// Move index `i` to `(i + n/2) % n` on both axes
fn fftshift(surface: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = surface.dim();
    let (half_rows, half_cols) = (rows / 2, cols / 2);
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        surface[[(r + rows - half_rows) % rows, (c + cols - half_cols) % cols]]
    })
}

/// Row-major scan for the global maximum; the first occurrence wins ties.
fn find_peak(surface: &Array2<f64>) -> (usize, usize, f64) {
    let mut best = (0, 0, f64::NEG_INFINITY);
    for ((r, c), &v) in surface.indexed_iter() {
        if v > best.2 {
            best = (r, c, v);
        }
    }
    best
}
