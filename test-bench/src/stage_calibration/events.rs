//! Progress events and cancellation for calibration runs.

use cal_math::AffineTransform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::CalibrationError;

/// Events emitted for external callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    /// A phase is about to run
    PhaseStarted { phase: &'static str, progress: u64 },
    /// A registration passed the confidence threshold
    Measurement {
        phase: &'static str,
        progress: u64,
        stage_x: f64,
        stage_y: f64,
        pixel_dx: f64,
        pixel_dy: f64,
        confidence: f64,
    },
    /// A registration fell below the threshold; the frame is re-captured
    LowConfidenceRetry {
        attempt: usize,
        confidence: f64,
        threshold: f64,
    },
    FirstApproximation { transform: AffineTransform },
    Completed { transform: AffineTransform },
    /// The stage was returned to the initial position
    StageRestored { x: f64, y: f64 },
    Failed { error: CalibrationError },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type CalibrationCallback = Arc<dyn Fn(&CalibrationEvent) + Send + Sync>;

/// Cloneable cancel flag, checked before every stage move
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_shared_between_clones() {
        let token = CancellationToken::new();
        let remote = token.clone();
        assert!(!token.is_cancelled());

        remote.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
