//! Configuration storage for stage calibration data.
//!
//! All config is stored in ~/.cf_config/ by default. Stage calibrations
//! live in `stage_calibrations/<name>.json`, one file per stage/camera pair.

use crate::stage_calibration_record::{CalibrationRecordError, StageCalibrationRecord};
use std::path::{Path, PathBuf};

/// Configuration storage manager for calibration data.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.cf_config)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.cf_config)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".cf_config");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn stage_calibrations_dir(&self) -> PathBuf {
        self.root_path.join("stage_calibrations")
    }

    fn stage_calibration_path(&self, name: &str) -> Result<PathBuf, CalibrationRecordError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(CalibrationRecordError::InvalidName(name.to_string()));
        }
        let name_safe = name.replace(' ', "_");
        Ok(self
            .stage_calibrations_dir()
            .join(format!("{name_safe}.json")))
    }

    /// Get a stage calibration by name.
    ///
    /// Returns None if no calibration exists under that name.
    /// Returns Some(Err) if the name is invalid or the file cannot be loaded.
    pub fn get_stage_calibration(
        &self,
        name: &str,
    ) -> Option<Result<StageCalibrationRecord, CalibrationRecordError>> {
        let path = match self.stage_calibration_path(name) {
            Ok(path) => path,
            Err(e) => return Some(Err(e)),
        };

        if !path.exists() {
            return None;
        }

        Some(StageCalibrationRecord::load(&path))
    }

    /// Save a stage calibration under `name`, replacing any previous one.
    ///
    /// Creates the stage_calibrations directory if it doesn't exist.
    /// Returns the path where the record was saved.
    pub fn save_stage_calibration(
        &self,
        name: &str,
        record: &StageCalibrationRecord,
    ) -> Result<PathBuf, CalibrationRecordError> {
        let path = self.stage_calibration_path(name)?;
        std::fs::create_dir_all(self.stage_calibrations_dir())?;

        record.save(&path)?;
        Ok(path)
    }

    /// List the names of all stored stage calibrations, sorted.
    pub fn list_stage_calibrations(&self) -> std::io::Result<Vec<String>> {
        let dir = self.stage_calibrations_dir();

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.replace('_', " "));
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Delete a stage calibration.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_stage_calibration(&self, name: &str) -> Result<bool, CalibrationRecordError> {
        let path = self.stage_calibration_path(name)?;

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(path)?;
        Ok(true)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".cf_config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cal_math::AffineTransform;
    use tempfile::TempDir;

    fn create_test_storage() -> (TempDir, ConfigStorage) {
        let dir = TempDir::new().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("cf_config"));
        (dir, storage)
    }

    fn record(pixel_size: f64) -> StageCalibrationRecord {
        StageCalibrationRecord::from_fit(
            AffineTransform::new(pixel_size, 0.0, 10.0, 0.0, pixel_size, 20.0),
            &[],
        )
    }

    #[test]
    fn test_stage_calibration_path() {
        let (_dir, storage) = create_test_storage();
        let path = storage.stage_calibration_path("xy stage").unwrap();

        assert!(path.to_str().unwrap().contains("stage_calibrations"));
        assert!(path.to_str().unwrap().ends_with("xy_stage.json"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_dir, storage) = create_test_storage();
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                storage.save_stage_calibration(name, &record(1.0)),
                Err(CalibrationRecordError::InvalidName(_))
            ));
        }
        assert!(matches!(
            storage.get_stage_calibration("../escape"),
            Some(Err(CalibrationRecordError::InvalidName(_)))
        ));
    }

    #[test]
    fn test_save_and_load_stage_calibration() {
        let (_dir, storage) = create_test_storage();

        let path = storage
            .save_stage_calibration("microscope", &record(0.5))
            .unwrap();
        assert!(path.exists());

        let loaded = storage
            .get_stage_calibration("microscope")
            .expect("Calibration should exist")
            .expect("Calibration should load successfully");

        assert_relative_eq!(loaded.transform.pixel_size(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(loaded.transform.translation().x, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_get_nonexistent_calibration() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.get_stage_calibration("nothing").is_none());
    }

    #[test]
    fn test_list_stage_calibrations() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.list_stage_calibrations().unwrap().is_empty());

        storage.save_stage_calibration("stage b", &record(1.0)).unwrap();
        storage.save_stage_calibration("stage a", &record(2.0)).unwrap();

        assert_eq!(
            storage.list_stage_calibrations().unwrap(),
            vec!["stage a".to_string(), "stage b".to_string()]
        );
    }

    #[test]
    fn test_delete_stage_calibration() {
        let (_dir, storage) = create_test_storage();
        storage.save_stage_calibration("old", &record(1.0)).unwrap();

        assert!(storage.delete_stage_calibration("old").unwrap());
        assert!(storage.get_stage_calibration("old").is_none());
        assert!(!storage.delete_stage_calibration("old").unwrap());
    }
}
