//! Persistent stage calibration record.
//!
//! Wraps the fitted pixel → stage transform with the metadata needed to
//! judge it later: when it was taken, from how many points, and how well
//! the points fit.

use cal_math::{AffineTransform, CorrespondencePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

/// Error during record save/load
#[derive(Error, Debug)]
pub enum CalibrationRecordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid record name {0:?}: must be non-empty and free of path separators")]
    InvalidName(String),
}

/// A finished stage calibration as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCalibrationRecord {
    /// Pixel displacement → absolute stage position
    pub transform: AffineTransform,

    /// Calibration timestamp (RFC 3339)
    pub calibration_timestamp: String,

    /// Correspondence points used in the final fit
    pub num_points: usize,

    /// RMS fit residual in stage units
    #[serde(default)]
    pub rms_residual: Option<f64>,

    #[serde(default)]
    pub description: Option<String>,
}

impl StageCalibrationRecord {
    /// Build a record from the final fit and the points it was fitted to
    pub fn from_fit(transform: AffineTransform, points: &[CorrespondencePoint]) -> Self {
        Self {
            transform,
            calibration_timestamp: Utc::now().to_rfc3339(),
            num_points: points.len(),
            rms_residual: transform.rms_residual(points),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Parsed timestamp, `None` if the stored string is not RFC 3339
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.calibration_timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Save record to a JSON file
    pub fn save(&self, path: &Path) -> Result<(), CalibrationRecordError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Load record from a JSON file
    pub fn load(path: &Path) -> Result<Self, CalibrationRecordError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn sample_points() -> Vec<CorrespondencePoint> {
        vec![
            CorrespondencePoint::new(0.0, 0.0, 100.0, 200.0),
            CorrespondencePoint::new(50.0, 0.0, 125.0, 200.0),
            CorrespondencePoint::new(0.0, 50.0, 100.0, 225.0),
            CorrespondencePoint::new(50.0, 50.0, 125.1, 225.0),
        ]
    }

    #[test]
    fn test_from_fit_metadata() {
        let transform = AffineTransform::new(0.5, 0.0, 100.0, 0.0, 0.5, 200.0);
        let record = StageCalibrationRecord::from_fit(transform, &sample_points())
            .with_description("bench 3");

        assert_eq!(record.num_points, 4);
        assert!(record.timestamp().is_some());
        assert_eq!(record.description.as_deref(), Some("bench 3"));
        // only the last point is off, by 0.1 in x
        assert_relative_eq!(record.rms_residual.unwrap(), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.json");

        let transform = AffineTransform::new(0.5, 0.01, 100.0, -0.01, 0.5, 200.0);
        let record = StageCalibrationRecord::from_fit(transform, &sample_points());
        record.save(&path).unwrap();

        let loaded = StageCalibrationRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = StageCalibrationRecord::load(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(CalibrationRecordError::Io(_))));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            StageCalibrationRecord::load(&path),
            Err(CalibrationRecordError::Json(_))
        ));
    }

    #[test]
    fn test_bad_timestamp() {
        let mut record = StageCalibrationRecord::from_fit(AffineTransform::identity(), &[]);
        record.calibration_timestamp = "yesterday".to_string();
        assert!(record.timestamp().is_none());
        assert!(record.rms_residual.is_none());
    }
}
