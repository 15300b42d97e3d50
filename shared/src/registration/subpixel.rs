//! Parabolic peak interpolation.

use ndarray::ArrayView2;

/// Vertex of the parabola through `(-1, left)`, `(0, center)`, `(1, right)`.
///
/// Positive when `right > left`. The correlation surface is built from
/// `F_target · conj(F_reference)`, so its peak sits at `+shift` and the
/// vertex is added to the peak index as is.
///
/// Returns 0 when the three samples are collinear.
pub fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = 2.0 * (2.0 * center - left - right);
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (right - left) / denom
}

/// Sub-pixel `(row, col)` offsets of the peak at `(row, col)`.
///
/// Each axis is refined independently. An axis whose peak sits on the
/// surface boundary gets no refinement.
pub fn refine_peak(surface: ArrayView2<f64>, row: usize, col: usize) -> (f64, f64) {
    let (rows, cols) = surface.dim();
    let center = surface[[row, col]];

    let row_offset = if row > 0 && row + 1 < rows {
        parabolic_offset(surface[[row - 1, col]], center, surface[[row + 1, col]])
    } else {
        0.0
    };
    let col_offset = if col > 0 && col + 1 < cols {
        parabolic_offset(surface[[row, col - 1]], center, surface[[row, col + 1]])
    } else {
        0.0
    };

    (row_offset, col_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_symmetric_peak_has_no_offset() {
        assert_abs_diff_eq!(parabolic_offset(0.5, 1.0, 0.5), 0.0);
    }

    #[test]
    fn test_offset_leans_toward_larger_neighbor() {
        // Samples of -(x - 0.25)^2 at x = -1, 0, 1
        let f = |x: f64| -(x - 0.25) * (x - 0.25);
        assert_abs_diff_eq!(parabolic_offset(f(-1.0), f(0.0), f(1.0)), 0.25, epsilon = 1e-12);
        let g = |x: f64| -(x + 0.4) * (x + 0.4);
        assert_abs_diff_eq!(parabolic_offset(g(-1.0), g(0.0), g(1.0)), -0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_samples() {
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_boundary_peak_not_refined() {
        let surface = array![[1.0, 0.5, 0.0], [0.9, 0.2, 0.0], [0.0, 0.0, 0.0]];
        let (dr, dc) = refine_peak(surface.view(), 0, 0);
        assert_eq!(dr, 0.0);
        assert_eq!(dc, 0.0);
    }

    #[test]
    fn test_interior_peak_refined_per_axis() {
        let mut surface = Array2::<f64>::zeros((5, 5));
        surface[[2, 2]] = 1.0;
        surface[[2, 3]] = 0.5;
        surface[[1, 2]] = 0.5;
        let (dr, dc) = refine_peak(surface.view(), 2, 2);
        assert!(dr < 0.0);
        assert!(dc > 0.0);
        assert_abs_diff_eq!(dr, -dc, epsilon = 1e-12);
    }
}
