//! Camera interface trait for calibration workflows.

use crate::HardwareError;
use ndarray::Array2;
use num_traits::ToPrimitive;

/// Interface for a grayscale camera
pub trait CameraInterface {
    /// Sample type of captured frames (e.g. `u16` for most sensors)
    type Pixel: ToPrimitive + Copy;

    /// Capture one frame, shape `(rows, cols)`
    fn capture_frame(&mut self) -> Result<Array2<Self::Pixel>, HardwareError>;
}

impl<T: CameraInterface + ?Sized> CameraInterface for &mut T {
    type Pixel = T::Pixel;

    fn capture_frame(&mut self) -> Result<Array2<Self::Pixel>, HardwareError> {
        (**self).capture_frame()
    }
}
