//! Per-run calibration state.

use cal_math::{AffineTransform, CorrespondencePoint};
use nalgebra::Vector2;
use ndarray::{Array2, ArrayView2};
use shared::registration::{centered_window, DisplacementEstimate, PhaseCorrelator, RegistrationError};
use tracing::debug;

use super::CalibrationError;

/// Reference frame plus the correlator planned for it
#[derive(Debug)]
pub struct Reference {
    image: Array2<f64>,
    window_side: Option<usize>,
    correlator: PhaseCorrelator,
}

impl Reference {
    /// `image` is the minimum-subtracted reference frame. With a window
    /// side, only the centered window of that side is registered.
    pub fn new(
        image: Array2<f64>,
        window_side: Option<usize>,
        eps: f64,
    ) -> Result<Self, RegistrationError> {
        let shape = match window_side {
            Some(side) => {
                let (row, col) = center(&image);
                centered_window(image.view(), row, col, side)?.dim()
            }
            None => image.dim(),
        };
        Ok(Self {
            correlator: PhaseCorrelator::new(shape, eps)?,
            image,
            window_side,
        })
    }

    pub fn image(&self) -> ArrayView2<'_, f64> {
        self.image.view()
    }

    pub fn window_side(&self) -> Option<usize> {
        self.window_side
    }

    /// Total displacement of `frame`'s content relative to the reference.
    ///
    /// Windowed references look for the target window at the rounded
    /// `predicted` displacement, moved back inside the frame where the
    /// prediction would push it out. The true displacement must stay within
    /// half a window of the offset actually used.
    pub fn displacement(
        &self,
        frame: ArrayView2<f64>,
        predicted: Vector2<f64>,
    ) -> Result<DisplacementEstimate, RegistrationError> {
        if frame.dim() != self.image.dim() {
            return Err(RegistrationError::DimensionMismatch {
                reference: self.image.dim(),
                target: frame.dim(),
            });
        }
        let Some(side) = self.window_side else {
            return self.correlator.correlate(self.image.view(), frame);
        };

        let (rows, cols) = self.image.dim();
        let (row, col) = center(&self.image);
        let target_row = clamp_center(row + predicted.y.round() as isize, rows, side);
        let target_col = clamp_center(col + predicted.x.round() as isize, cols, side);
        let (shift_row, shift_col) = (target_row - row, target_col - col);
        if (shift_col as f64 - predicted.x).abs() > 0.5 || (shift_row as f64 - predicted.y).abs() > 0.5 {
            debug!(
                "Target window held inside the frame at offset ({}, {}) for prediction ({:.2}, {:.2})",
                shift_col, shift_row, predicted.x, predicted.y
            );
        }

        let reference = centered_window(self.image.view(), row, col, side)?;
        let target = centered_window(frame, target_row, target_col, side)?;
        let estimate = self.correlator.correlate(reference, target)?;

        Ok(DisplacementEstimate {
            shift_x: estimate.shift_x + shift_col as f64,
            shift_y: estimate.shift_y + shift_row as f64,
            confidence: estimate.confidence,
        })
    }
}

fn center(image: &Array2<f64>) -> (isize, isize) {
    let (rows, cols) = image.dim();
    ((rows / 2) as isize, (cols / 2) as isize)
}

/// Nearest center whose `side` window fits in `len` samples
fn clamp_center(center: isize, len: usize, side: usize) -> isize {
    let half = (side / 2) as isize;
    let highest = len as isize - side as isize + half;
    center.min(highest).max(half)
}

/// State accumulated over one calibration run
#[derive(Debug)]
pub struct CalibrationSession {
    safe_travel_radius: f64,
    initial_position: Option<Vector2<f64>>,
    reference: Option<Reference>,
    search_points: Vec<CorrespondencePoint>,
    corner_points: Vec<CorrespondencePoint>,
    first_approximation: Option<AffineTransform>,
    progress: u64,
}

impl CalibrationSession {
    pub fn new(safe_travel_radius: f64) -> Self {
        Self {
            safe_travel_radius,
            initial_position: None,
            reference: None,
            search_points: Vec::new(),
            corner_points: Vec::new(),
            first_approximation: None,
            progress: 0,
        }
    }

    /// Begin a run at `initial`, dropping anything from a previous run
    pub fn start(&mut self, initial: Vector2<f64>) {
        self.initial_position = Some(initial);
        self.reference = None;
        self.search_points.clear();
        self.corner_points.clear();
        self.first_approximation = None;
        self.progress = 0;
    }

    pub fn is_started(&self) -> bool {
        self.initial_position.is_some()
    }

    pub fn initial_position(&self) -> Result<Vector2<f64>, CalibrationError> {
        self.initial_position
            .ok_or(CalibrationError::SessionNotStarted("initial position"))
    }

    pub fn set_reference(&mut self, reference: Reference) {
        self.reference = Some(reference);
    }

    pub fn reference(&self) -> Result<&Reference, CalibrationError> {
        self.reference
            .as_ref()
            .ok_or(CalibrationError::SessionNotStarted("reference image"))
    }

    pub fn safe_travel_radius(&self) -> f64 {
        self.safe_travel_radius
    }

    /// Fails if `target` lies farther than the safe radius from the initial position
    pub fn check_target(&self, target: Vector2<f64>) -> Result<(), CalibrationError> {
        let distance = (target - self.initial_position()?).norm();
        if distance > self.safe_travel_radius || !distance.is_finite() {
            return Err(CalibrationError::SafetyLimitExceeded {
                target_x: target.x,
                target_y: target.y,
                distance,
                radius: self.safe_travel_radius,
            });
        }
        Ok(())
    }

    pub fn record_search_point(&mut self, point: CorrespondencePoint) {
        self.search_points.push(point);
    }

    pub fn record_corner_point(&mut self, point: CorrespondencePoint) {
        self.corner_points.push(point);
    }

    /// Origin and axis-search correspondences
    pub fn search_points(&self) -> &[CorrespondencePoint] {
        &self.search_points
    }

    pub fn corner_points(&self) -> &[CorrespondencePoint] {
        &self.corner_points
    }

    pub fn set_first_approximation(&mut self, transform: AffineTransform) {
        self.first_approximation = Some(transform);
    }

    pub fn first_approximation(&self) -> Option<AffineTransform> {
        self.first_approximation
    }

    /// Number of measurements taken so far
    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub(crate) fn advance_progress(&mut self) -> u64 {
        self.progress += 1;
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use shared::registration::DEFAULT_EPS;

    /// Hash noise: deterministic, no repeating structure
    fn textured(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let h = (r as u64).wrapping_mul(73_856_093) ^ (c as u64).wrapping_mul(19_349_663);
            ((h.wrapping_mul(2_654_435_761) >> 16) & 0x3ff) as f64
        })
    }

    fn shifted(image: &Array2<f64>, dx: isize, dy: isize) -> Array2<f64> {
        let (rows, cols) = image.dim();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let src_r = (r as isize - dy).rem_euclid(rows as isize) as usize;
            let src_c = (c as isize - dx).rem_euclid(cols as isize) as usize;
            image[[src_r, src_c]]
        })
    }

    #[test]
    fn test_session_not_started() {
        let session = CalibrationSession::new(100.0);
        assert!(!session.is_started());
        assert_eq!(
            session.initial_position(),
            Err(CalibrationError::SessionNotStarted("initial position"))
        );
        assert!(matches!(
            session.reference(),
            Err(CalibrationError::SessionNotStarted(_))
        ));
        assert!(session.check_target(Vector2::zeros()).is_err());
    }

    #[test]
    fn test_safety_is_relative_to_initial_position() {
        let mut session = CalibrationSession::new(10.0);
        session.start(Vector2::new(1000.0, -500.0));

        assert!(session.check_target(Vector2::new(1006.0, -492.0)).is_ok());
        let err = session.check_target(Vector2::new(1011.0, -500.0)).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::SafetyLimitExceeded { radius, .. } if radius == 10.0
        ));
    }

    #[test]
    fn test_start_resets_points() {
        let mut session = CalibrationSession::new(10.0);
        session.start(Vector2::zeros());
        session.record_search_point(CorrespondencePoint::new(0.0, 0.0, 0.0, 0.0));
        session.advance_progress();

        session.start(Vector2::new(1.0, 1.0));
        assert!(session.search_points().is_empty());
        assert_eq!(session.progress(), 0);
    }

    #[test]
    fn test_full_frame_reference_measures_total_shift() {
        let image = textured(64, 64);
        let reference = Reference::new(image.clone(), None, DEFAULT_EPS).unwrap();
        let target = shifted(&image, 6, -4);

        let estimate = reference
            .displacement(target.view(), Vector2::new(100.0, 100.0))
            .unwrap();
        assert_abs_diff_eq!(estimate.shift_x, 6.0, epsilon = 0.1);
        assert_abs_diff_eq!(estimate.shift_y, -4.0, epsilon = 0.1);
    }

    #[test]
    fn test_windowed_reference_adds_prediction() {
        let image = textured(128, 128);
        let reference = Reference::new(image.clone(), Some(32), DEFAULT_EPS).unwrap();
        let target = shifted(&image, 20, -11);

        let estimate = reference
            .displacement(target.view(), Vector2::new(18.6, -10.2))
            .unwrap();
        assert_abs_diff_eq!(estimate.shift_x, 20.0, epsilon = 0.1);
        assert_abs_diff_eq!(estimate.shift_y, -11.0, epsilon = 0.1);
    }

    #[test]
    fn test_reference_window_must_fit() {
        let image = textured(64, 64);
        assert!(matches!(
            Reference::new(image, Some(128), DEFAULT_EPS),
            Err(RegistrationError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_target_window_held_inside_frame() {
        let image = textured(128, 128);
        let reference = Reference::new(image.clone(), Some(32), DEFAULT_EPS).unwrap();
        let target = shifted(&image, 50, -3);

        // Centre 64 + 55 would put the window past column 128; it stops at 112
        let estimate = reference
            .displacement(target.view(), Vector2::new(55.0, -3.0))
            .unwrap();
        assert_abs_diff_eq!(estimate.shift_x, 50.0, epsilon = 0.1);
        assert_abs_diff_eq!(estimate.shift_y, -3.0, epsilon = 0.1);
    }

    #[test]
    fn test_clamp_center() {
        assert_eq!(clamp_center(64, 128, 32), 64);
        assert_eq!(clamp_center(119, 128, 32), 112);
        assert_eq!(clamp_center(-5, 128, 32), 16);
        assert_eq!(clamp_center(3, 64, 63), 31);
    }
}
