//! Stage interface trait for calibration workflows.

use crate::HardwareError;

/// Interface for a two-axis motorized stage
///
/// Positions are absolute, in the stage's physical units.
pub trait StageInterface {
    /// Current stage position `(x, y)`
    fn get_position(&mut self) -> Result<(f64, f64), HardwareError>;

    /// Move both axes to `(x, y)`, blocking until the stage has settled
    fn move_to(&mut self, x: f64, y: f64) -> Result<(), HardwareError>;
}

impl<T: StageInterface + ?Sized> StageInterface for &mut T {
    fn get_position(&mut self) -> Result<(f64, f64), HardwareError> {
        (**self).get_position()
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<(), HardwareError> {
        (**self).move_to(x, y)
    }
}

impl<T: StageInterface + ?Sized> StageInterface for Box<T> {
    fn get_position(&mut self) -> Result<(f64, f64), HardwareError> {
        (**self).get_position()
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<(), HardwareError> {
        (**self).move_to(x, y)
    }
}
