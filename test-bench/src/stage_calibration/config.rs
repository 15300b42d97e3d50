//! Configuration types for stage calibration

use serde::{Deserialize, Serialize};
use shared::registration::{auto_window_side, DEFAULT_EPS};
use shared::ImageSize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

use super::CalibrationError;

/// Which part of each frame is registered against the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoiMode {
    /// Register whole frames; measures total displacement
    #[default]
    FullFrame,
    /// Register a `side`×`side` window at the frame center against a target
    /// window moved by the predicted displacement
    Centered { side: usize },
    /// `Centered` with the largest power of two <= min(width, height) / 4
    Auto,
}

impl RoiMode {
    /// Window side for a frame of `size`, `None` for full-frame registration
    pub fn window_side(&self, size: ImageSize) -> Option<usize> {
        match *self {
            RoiMode::FullFrame => None,
            RoiMode::Centered { side } => Some(side),
            RoiMode::Auto => Some(auto_window_side(size)),
        }
    }
}

/// Configuration for the stage calibration procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// First stage step of the doubling search, stage units
    pub seed_step: f64,
    /// The search stops once the next predicted displacement would exceed this, pixels
    pub max_pixel_displacement: f64,
    /// Cap on doubling iterations per axis
    pub max_search_iterations: usize,
    /// Largest allowed distance of any target from the initial position, stage units
    pub safe_travel_radius: f64,
    /// Corner measurement offset from the frame center, pixels
    pub corner_offset_pixels: f64,
    /// Registrations below this peak value are rejected
    pub min_confidence: f64,
    /// Re-captures at the same position after a low-confidence registration
    pub low_confidence_retries: usize,
    /// Regularization of the cross-power spectrum
    pub registration_eps: f64,
    pub roi: RoiMode,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            seed_step: 0.1,
            max_pixel_displacement: 100.0,
            max_search_iterations: 25,
            safe_travel_radius: 10000.0,
            corner_offset_pixels: 50.0,
            min_confidence: 0.05,
            low_confidence_retries: 1,
            registration_eps: DEFAULT_EPS,
            roi: RoiMode::FullFrame,
        }
    }
}

/// Error reading or writing a configuration file
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] CalibrationError),
}

impl CalibrationConfig {
    /// Reject values the procedure cannot run with
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let positive = [
            ("seed_step", self.seed_step),
            ("max_pixel_displacement", self.max_pixel_displacement),
            ("safe_travel_radius", self.safe_travel_radius),
            ("corner_offset_pixels", self.corner_offset_pixels),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(CalibrationError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("registration_eps", self.registration_eps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CalibrationError::InvalidConfig(format!(
                    "{name} must be non-negative and finite, got {value}"
                )));
            }
        }
        if self.max_search_iterations == 0 {
            return Err(CalibrationError::InvalidConfig(
                "max_search_iterations must be at least 1".to_string(),
            ));
        }
        if let RoiMode::Centered { side: 0 } = self.roi {
            return Err(CalibrationError::InvalidConfig(
                "ROI side must be at least 1 pixel".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a JSON config; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
