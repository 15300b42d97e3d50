//! Test bench for calibrating a motorized stage against a camera.

pub mod stage_calibration;
