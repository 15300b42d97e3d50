//! Hardware interfaces for the calibration test bench.
//!
//! The calibration controller only needs two narrow capabilities: a stage
//! that reports and changes its position, and a camera that returns frames.
//! Drivers and simulators implement the traits defined here.

pub mod camera_interface;
pub mod stage_interface;

pub use camera_interface::CameraInterface;
pub use stage_interface::StageInterface;

use thiserror::Error;

/// Fault reported by a stage or camera driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    #[error("stage error: {0}")]
    Stage(String),

    #[error("camera error: {0}")]
    Camera(String),
}
