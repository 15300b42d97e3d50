//! Shared building blocks for stage/camera calibration: image
//! normalization, square window extraction, phase-correlation registration
//! and on-disk storage of finished calibrations.

pub mod image_proc;
pub mod image_size;
pub mod registration;
pub mod stage_calibration_record;

#[cfg(feature = "config-storage")]
pub mod config_storage;

pub use image_size::ImageSize;
pub use registration::{estimate_shift, DisplacementEstimate, PhaseCorrelator, RegistrationError};
