//! Square registration windows cut out of full frames.

use super::RegistrationError;
use crate::image_size::ImageSize;
use ndarray::{s, ArrayView2};

/// Largest power of two `<= n` (0 for 0)
pub fn largest_power_of_two_at_most(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// Default window side for a frame: the largest power of two that fits
/// four times along the shorter axis.
pub fn auto_window_side(size: ImageSize) -> usize {
    largest_power_of_two_at_most(size.min_dimension() / 4)
}

/// Borrow the `side`×`side` window centered on `(center_row, center_col)`.
///
/// The window spans `center - side / 2 .. center - side / 2 + side` on each
/// axis and must lie entirely inside the frame.
pub fn centered_window<T>(
    image: ArrayView2<'_, T>,
    center_row: isize,
    center_col: isize,
    side: usize,
) -> Result<ArrayView2<'_, T>, RegistrationError> {
    let (rows, cols) = image.dim();
    if side == 0 {
        return Err(RegistrationError::EmptyImage);
    }

    let out_of_bounds = RegistrationError::WindowOutOfBounds {
        center_row,
        center_col,
        side,
        rows,
        cols,
    };
    let half = (side / 2) as isize;
    let (row0, col0) = (center_row - half, center_col - half);
    if row0 < 0 || col0 < 0 {
        return Err(out_of_bounds);
    }
    let (row0, col0) = (row0 as usize, col0 as usize);
    if row0 + side > rows || col0 + side > cols {
        return Err(out_of_bounds);
    }

    Ok(image.slice_move(s![row0..row0 + side, col0..col0 + side]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_largest_power_of_two() {
        assert_eq!(largest_power_of_two_at_most(0), 0);
        assert_eq!(largest_power_of_two_at_most(1), 1);
        assert_eq!(largest_power_of_two_at_most(127), 64);
        assert_eq!(largest_power_of_two_at_most(128), 128);
        assert_eq!(largest_power_of_two_at_most(1000), 512);
    }

    #[test]
    fn test_auto_window_side() {
        assert_eq!(auto_window_side(ImageSize::from_width_height(640, 480)), 64);
        assert_eq!(auto_window_side(ImageSize::from_width_height(512, 512)), 128);
        assert_eq!(auto_window_side(ImageSize::from_width_height(3, 3)), 0);
    }

    #[test]
    fn test_centered_window_contents() {
        let image = Array2::from_shape_fn((10, 12), |(r, c)| r * 100 + c);
        let window = centered_window(image.view(), 5, 6, 4).unwrap();
        assert_eq!(window.dim(), (4, 4));
        assert_eq!(window[[0, 0]], 304);
        assert_eq!(window[[3, 3]], 607);
    }

    #[test]
    fn test_window_touching_edges_is_allowed() {
        let image = Array2::<f64>::zeros((8, 8));
        assert!(centered_window(image.view(), 4, 4, 8).is_ok());
    }

    #[test]
    fn test_window_out_of_bounds() {
        let image = Array2::<f64>::zeros((8, 8));
        assert!(matches!(
            centered_window(image.view(), 2, 4, 6),
            Err(RegistrationError::WindowOutOfBounds { side: 6, .. })
        ));
        assert!(matches!(
            centered_window(image.view(), 4, 6, 6),
            Err(RegistrationError::WindowOutOfBounds { .. })
        ));
        assert!(matches!(
            centered_window(image.view(), 4, 4, 0),
            Err(RegistrationError::EmptyImage)
        ));
    }
}
