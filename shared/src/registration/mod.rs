//! Translation registration between two images via phase correlation.
//!
//! The engine only measures: it never rejects or retries on low confidence.
//! Callers decide what confidence is good enough with
//! [`DisplacementEstimate::is_reliable`].

pub mod phase_correlation;
pub mod subpixel;
pub mod window;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use phase_correlation::{estimate_shift, PhaseCorrelator, DEFAULT_EPS};
pub use window::{auto_window_side, centered_window, largest_power_of_two_at_most};

/// Errors produced by the registration engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("image dimensions differ: reference {reference:?}, target {target:?} (rows, cols)")]
    DimensionMismatch {
        reference: (usize, usize),
        target: (usize, usize),
    },

    #[error("cannot register an empty image")]
    EmptyImage,

    #[error(
        "window of side {side} centered at (row {center_row}, col {center_col}) leaves the {rows}x{cols} frame"
    )]
    WindowOutOfBounds {
        center_row: isize,
        center_col: isize,
        side: usize,
        rows: usize,
        cols: usize,
    },
}

/// Measured displacement of the target's content relative to the reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplacementEstimate {
    /// Displacement along image columns, pixels
    pub shift_x: f64,
    /// Displacement along image rows, pixels
    pub shift_y: f64,
    /// Correlation surface magnitude at the integer peak, nominally (0, 1]
    pub confidence: f64,
}

impl DisplacementEstimate {
    pub fn shift(&self) -> (f64, f64) {
        (self.shift_x, self.shift_y)
    }

    /// True when the correlation peak reaches `min_confidence`
    pub fn is_reliable(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reliable_threshold() {
        let estimate = DisplacementEstimate {
            shift_x: 1.0,
            shift_y: -2.0,
            confidence: 0.05,
        };
        assert!(estimate.is_reliable(0.05));
        assert!(!estimate.is_reliable(0.06));
        assert_eq!(estimate.shift(), (1.0, -2.0));
    }

    #[test]
    fn test_error_messages() {
        let err = RegistrationError::DimensionMismatch {
            reference: (10, 20),
            target: (10, 21),
        };
        assert!(err.to_string().contains("(10, 21)"));
    }
}
