//! Deterministic stand-ins for calibration hardware.
//!
//! [`SimulatedStage`] moves instantly, optionally with backlash and a hard
//! travel limit. [`SimulatedCamera`] renders a seeded field of Gaussian
//! spots at the position implied by the stage and a ground-truth
//! [`OpticalModel`], so a calibration run has a known right answer.

pub mod camera;
pub mod scene;
pub mod stage;

pub use camera::{OpticalModel, SimulatedCamera};
pub use scene::{Spot, SpotField, SpotFieldParams};
pub use stage::{SimulatedStage, StageMove, StagePositionHandle};

use thiserror::Error;

/// Invalid simulator parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulatorError {
    #[error("invalid simulator parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}
