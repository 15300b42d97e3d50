//! Simulated two-axis stage.

use hardware::{HardwareError, StageInterface};
use nalgebra::Vector2;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::SimulatorError;

/// Shared read access to the stage's actual position.
///
/// The simulated camera holds one of these so frames follow the stage.
#[derive(Debug, Clone)]
pub struct StagePositionHandle(Arc<Mutex<Vector2<f64>>>);

impl StagePositionHandle {
    fn new(position: Vector2<f64>) -> Self {
        Self(Arc::new(Mutex::new(position)))
    }

    pub fn get(&self) -> Vector2<f64> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, position: Vector2<f64>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = position;
    }
}

/// One completed move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageMove {
    pub commanded: Vector2<f64>,
    pub actual: Vector2<f64>,
}

/// Stage that settles instantly.
///
/// With backlash `b`, each axis only moves once the command leaves the
/// band `actual ± b`, and then stops `b` short of the command on the side
/// it came from.
#[derive(Debug)]
pub struct SimulatedStage {
    position: StagePositionHandle,
    home: Vector2<f64>,
    backlash: f64,
    travel_limit: Option<f64>,
    history: Vec<StageMove>,
}

impl SimulatedStage {
    /// Stage sitting at `(x, y)` with no backlash and unlimited travel
    pub fn new(x: f64, y: f64) -> Self {
        let home = Vector2::new(x, y);
        Self {
            position: StagePositionHandle::new(home),
            home,
            backlash: 0.0,
            travel_limit: None,
            history: Vec::new(),
        }
    }

    pub fn with_backlash(mut self, backlash: f64) -> Result<Self, SimulatorError> {
        if !backlash.is_finite() || backlash < 0.0 {
            return Err(SimulatorError::InvalidParameter {
                name: "backlash",
                value: backlash,
            });
        }
        self.backlash = backlash;
        Ok(self)
    }

    /// Reject moves more than `limit` away from the starting position on either axis
    pub fn with_travel_limit(mut self, limit: f64) -> Result<Self, SimulatorError> {
        if limit.is_nan() || limit <= 0.0 {
            return Err(SimulatorError::InvalidParameter {
                name: "travel_limit",
                value: limit,
            });
        }
        self.travel_limit = Some(limit);
        Ok(self)
    }

    pub fn position_handle(&self) -> StagePositionHandle {
        self.position.clone()
    }

    pub fn position(&self) -> Vector2<f64> {
        self.position.get()
    }

    /// Every move issued so far, oldest first
    pub fn history(&self) -> &[StageMove] {
        &self.history
    }

    /// Largest distance from the starting position the stage has actually reached
    pub fn max_excursion(&self) -> f64 {
        self.history
            .iter()
            .map(|m| (m.actual - self.home).norm())
            .fold(0.0, f64::max)
    }

    fn settle(&self, current: f64, command: f64) -> f64 {
        current.clamp(command - self.backlash, command + self.backlash)
    }
}

impl StageInterface for SimulatedStage {
    fn get_position(&mut self) -> Result<(f64, f64), HardwareError> {
        let p = self.position.get();
        Ok((p.x, p.y))
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<(), HardwareError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(HardwareError::Stage(format!(
                "non-finite target ({x}, {y})"
            )));
        }
        let commanded = Vector2::new(x, y);
        if let Some(limit) = self.travel_limit {
            let offset = commanded - self.home;
            if offset.x.abs() > limit || offset.y.abs() > limit {
                return Err(HardwareError::Stage(format!(
                    "target ({x:.3}, {y:.3}) outside travel limit ±{limit}"
                )));
            }
        }

        let current = self.position.get();
        let actual = Vector2::new(
            self.settle(current.x, commanded.x),
            self.settle(current.y, commanded.y),
        );
        self.position.set(actual);
        self.history.push(StageMove { commanded, actual });
        debug!(
            "Stage moved to ({:.4}, {:.4}), commanded ({:.4}, {:.4})",
            actual.x, actual.y, x, y
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ideal_stage_reaches_command() {
        let mut stage = SimulatedStage::new(100.0, -50.0);
        stage.move_to(110.5, -40.25).unwrap();

        assert_eq!(stage.get_position().unwrap(), (110.5, -40.25));
        assert_eq!(stage.history().len(), 1);
        assert_relative_eq!(
            stage.max_excursion(),
            (10.5f64.powi(2) + 9.75f64.powi(2)).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_backlash_lags_direction_of_travel() {
        let mut stage = SimulatedStage::new(0.0, 0.0).with_backlash(0.5).unwrap();

        stage.move_to(10.0, 0.0).unwrap();
        assert_relative_eq!(stage.position().x, 9.5);
        assert_relative_eq!(stage.position().y, 0.0);

        // reversal inside the dead band does nothing
        stage.move_to(9.8, 0.0).unwrap();
        assert_relative_eq!(stage.position().x, 9.5);

        stage.move_to(5.0, -3.0).unwrap();
        assert_relative_eq!(stage.position().x, 5.5);
        assert_relative_eq!(stage.position().y, -2.5);
    }

    #[test]
    fn test_travel_limit() {
        let mut stage = SimulatedStage::new(0.0, 0.0).with_travel_limit(20.0).unwrap();
        assert!(stage.move_to(19.0, -19.0).is_ok());
        assert!(matches!(
            stage.move_to(21.0, 0.0),
            Err(HardwareError::Stage(_))
        ));
        // rejected move leaves stage alone
        assert_eq!(stage.get_position().unwrap(), (19.0, -19.0));
        assert_eq!(stage.history().len(), 1);
    }

    #[test]
    fn test_handle_tracks_position() {
        let mut stage = SimulatedStage::new(1.0, 2.0);
        let handle = stage.position_handle();
        stage.move_to(3.0, 4.0).unwrap();
        assert_eq!(handle.get(), Vector2::new(3.0, 4.0));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SimulatedStage::new(0.0, 0.0).with_backlash(-1.0).is_err());
        assert!(SimulatedStage::new(0.0, 0.0).with_travel_limit(0.0).is_err());
        assert!(SimulatedStage::new(0.0, 0.0)
            .move_to(f64::INFINITY, 0.0)
            .is_err());
    }
}
