//! Stage/camera calibration
//!
//! Finds the affine map from image displacement (pixels) to stage position
//! using nothing but image registration:
//!
//! 1. Capture a reference frame at the initial stage position
//! 2. Exponential-doubling search along stage X, then stage Y, until the
//!    image has moved far enough to measure the scale well
//! 3. First approximation from the origin and the two search results
//! 4. Measure four corners predicted by the first approximation and refit
//! 5. Return the stage to where it started
//!
//! Every move is checked against a safe travel radius around the initial
//! position, and the stage is restored on success, failure and cancellation.

pub mod config;
pub mod events;
pub mod executor;
pub mod session;

pub use config::{CalibrationConfig, ConfigFileError, RoiMode};
pub use events::{CalibrationCallback, CalibrationEvent, CallbackId, CancellationToken};
pub use executor::{CalibrationController, CalibrationResult};
pub use session::CalibrationSession;

use cal_math::{AffineFitError, AffineTransform};
use hardware::HardwareError;
use nalgebra::Vector2;
use shared::registration::RegistrationError;
use std::fmt;
use thiserror::Error;

/// Error during stage calibration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// A move would leave the safe travel radius; the move was not issued
    #[error(
        "stage safety limit reached: target ({target_x:.3}, {target_y:.3}) is {distance:.3} from the initial position, radius {radius}"
    )]
    SafetyLimitExceeded {
        target_x: f64,
        target_y: f64,
        distance: f64,
        radius: f64,
    },

    /// Affine fit failed (too few or collinear points)
    #[error("affine fit failed: {0}")]
    Fit(#[from] AffineFitError),

    /// Registration stayed below the confidence threshold after all retries
    #[error("registration confidence {confidence:.4} below threshold {threshold}")]
    RegistrationLowConfidence { confidence: f64, threshold: f64 },

    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("calibration cancelled")]
    Cancelled,

    /// A phase ran before the session had the state it needs
    #[error("session not started: {0} is not available yet")]
    SessionNotStarted(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The stage could not be returned to its initial position after a successful run
    #[error("failed to restore stage to ({x:.3}, {y:.3}): {reason}")]
    RestoreFailed { x: f64, y: f64, reason: String },
}

/// Stage axis searched by the doubling search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// Unit vector along this axis in stage coordinates
    pub fn unit(&self) -> Vector2<f64> {
        match self {
            Axis::X => Vector2::x(),
            Axis::Y => Vector2::y(),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Calibration state machine phases, each carrying the data it needs
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationPhase {
    /// Nothing recorded yet
    Idle,
    /// Initial position known; next capture becomes the reference
    CapturingReference,
    /// Doubling search along one stage axis
    SearchingAxis(Axis),
    /// Fit from the origin and both search results
    FirstApproximation,
    /// Probing corners predicted by the first approximation
    RefiningCorners { first_approximation: AffineTransform },
    /// Final transform known; stage still needs restoring
    Finalizing { transform: AffineTransform },
    Done { transform: AffineTransform },
    Failed(CalibrationError),
}

impl CalibrationPhase {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationPhase::Idle => "idle",
            CalibrationPhase::CapturingReference => "capturing_reference",
            CalibrationPhase::SearchingAxis(Axis::X) => "searching_x",
            CalibrationPhase::SearchingAxis(Axis::Y) => "searching_y",
            CalibrationPhase::FirstApproximation => "first_approximation",
            CalibrationPhase::RefiningCorners { .. } => "refining_corners",
            CalibrationPhase::Finalizing { .. } => "finalizing",
            CalibrationPhase::Done { .. } => "done",
            CalibrationPhase::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalibrationPhase::Done { .. } | CalibrationPhase::Failed(_)
        )
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
