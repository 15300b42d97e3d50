//! Image dimensions and size utilities

use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Represents the width and height of a camera frame.
/// Note the row-major convention of the arrays it describes: rows (height) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Size of an existing frame
    pub fn of<S: Data>(image: &ArrayBase<S, Ix2>) -> Self {
        let (height, width) = image.dim();
        Self { width, height }
    }

    /// Create an array of zeros with shape (height, width)
    pub fn empty_array(&self) -> Array2<f64> {
        Array2::zeros(self.shape())
    }

    /// ndarray shape `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }

    /// Smaller of the two dimensions
    pub fn min_dimension(&self) -> usize {
        self.width.min(self.height)
    }

    /// Integer center `(row, col)` = `(height / 2, width / 2)`
    pub fn center(&self) -> (usize, usize) {
        (self.height / 2, self.width / 2)
    }

    /// Convert to tuple (width, height)
    pub fn to_tuple(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

impl From<(usize, usize)> for ImageSize {
    fn from(dimensions: (usize, usize)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_is_row_major() {
        let size = ImageSize::from_width_height(640, 480);
        assert_eq!(size.shape(), (480, 640));
        assert_eq!(size.empty_array().dim(), (480, 640));
        assert_eq!(size.center(), (240, 320));
        assert_eq!(size.min_dimension(), 480);
    }

    #[test]
    fn test_of_frame() {
        let frame = Array2::<u16>::zeros((100, 200));
        let size = ImageSize::of(&frame);
        assert_eq!(size, ImageSize::from((200, 100)));
        assert_eq!(size.to_string(), "200x100");
        assert_eq!(size.pixel_count(), 20_000);
        assert!(!size.is_empty());
    }
}
