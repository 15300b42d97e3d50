//! Stage Calibration Executor
//!
//! Drives a stage and a camera through the calibration phases. Each phase is
//! run by [`CalibrationController::advance`], which takes the current phase
//! and returns the next one, so a run is just a loop over `advance` until a
//! terminal phase comes back.

use cal_math::{fit_affine, fit_linear, AffineTransform, CorrespondencePoint};
use hardware::{CameraInterface, StageInterface};
use nalgebra::{Matrix2, Vector2};
use shared::image_proc::zero_based;
use shared::stage_calibration_record::StageCalibrationRecord;
use shared::ImageSize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::session::{CalibrationSession, Reference};
use super::{
    Axis, CalibrationCallback, CalibrationConfig, CalibrationError, CalibrationEvent,
    CalibrationPhase, CallbackId, CancellationToken,
};

/// One accepted registration at a stage position
#[derive(Debug, Clone, Copy)]
struct Measurement {
    /// Displacement of the frame relative to the reference, pixels
    displacement: Vector2<f64>,
    /// Measured minus predicted displacement, pixels
    residual: Vector2<f64>,
    /// Stage position reported after the move
    stage_position: Vector2<f64>,
}

/// Result of a successful calibration
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// Pixel displacement → absolute stage position
    pub transform: AffineTransform,
    /// Fit from the origin and the two axis searches
    pub first_approximation: AffineTransform,
    pub search_points: Vec<CorrespondencePoint>,
    /// Points the final transform was fitted to
    pub corner_points: Vec<CorrespondencePoint>,
    /// RMS residual of the final fit, stage units
    pub rms_residual: Option<f64>,
    /// Accepted registrations over the run
    pub measurements: u64,
}

impl CalibrationResult {
    /// Stage units per pixel
    pub fn pixel_size(&self) -> f64 {
        self.transform.pixel_size()
    }

    /// Camera rotation relative to the stage, radians
    pub fn rotation(&self) -> f64 {
        self.transform.rotation()
    }

    pub fn skew(&self) -> f64 {
        self.transform.skew()
    }

    /// Storable record of the final fit
    pub fn to_record(&self) -> StageCalibrationRecord {
        StageCalibrationRecord::from_fit(self.transform, &self.corner_points)
    }
}

/// Stage/camera calibration state machine
pub struct CalibrationController<S: StageInterface, C: CameraInterface> {
    stage: S,
    camera: C,
    config: CalibrationConfig,
    cancel: CancellationToken,
    callbacks: HashMap<CallbackId, CalibrationCallback>,
    next_callback_id: CallbackId,
}

impl<S: StageInterface, C: CameraInterface> CalibrationController<S, C> {
    /// Create a controller that owns (or borrows, via `&mut`) its stage and camera
    pub fn new(stage: S, camera: C, config: CalibrationConfig) -> Self {
        Self {
            stage,
            camera,
            config,
            cancel: CancellationToken::new(),
            callbacks: HashMap::new(),
            next_callback_id: 0,
        }
    }

    /// Use an externally created cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn into_parts(self) -> (S, C) {
        (self.stage, self.camera)
    }

    /// Register a callback for calibration events
    pub fn register_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: Fn(&CalibrationEvent) + Send + Sync + 'static,
    {
        let callback_id = self.next_callback_id;
        self.next_callback_id += 1;
        self.callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&mut self, callback_id: CallbackId) -> bool {
        self.callbacks.remove(&callback_id).is_some()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    fn emit_event(&self, event: CalibrationEvent) {
        for callback in self.callbacks.values() {
            callback(&event);
        }
    }

    /// Run the whole procedure from `Idle` to a terminal phase.
    ///
    /// The stage is back at its initial position when this returns, unless
    /// restoring it failed (logged, or `RestoreFailed` on the success path).
    pub fn run(&mut self) -> Result<CalibrationResult, CalibrationError> {
        let mut session = CalibrationSession::new(self.config.safe_travel_radius);
        let mut phase = CalibrationPhase::Idle;

        loop {
            phase = match phase {
                CalibrationPhase::Done { transform } => {
                    return Ok(Self::result(&session, transform));
                }
                CalibrationPhase::Failed(error) => return Err(error),
                current => match self.advance(&mut session, current) {
                    Ok(next) => next,
                    Err(error) => CalibrationPhase::Failed(self.fail(&session, error)),
                },
            };
        }
    }

    /// Calibrate from a fixed list of stage moves instead of the search.
    ///
    /// Each entry of `moves` is a stage displacement from the initial
    /// position. The stage visits them in order with one registration per
    /// move, then `stage = M · pixel` is fitted over the measured pairs with
    /// no translation term. The returned transform carries `M` and the
    /// initial position as its translation. The stage is restored as in
    /// [`run`](Self::run).
    pub fn run_moves(
        &mut self,
        moves: &[Vector2<f64>],
    ) -> Result<CalibrationResult, CalibrationError> {
        let mut session = CalibrationSession::new(self.config.safe_travel_radius);
        match self.fixed_moves(&mut session, moves) {
            Ok(transform) => Ok(Self::result(&session, transform)),
            Err(error) => Err(self.fail(&session, error)),
        }
    }

    fn fixed_moves(
        &mut self,
        session: &mut CalibrationSession,
        moves: &[Vector2<f64>],
    ) -> Result<AffineTransform, CalibrationError> {
        let phase = self.advance(session, CalibrationPhase::Idle)?;
        self.advance(session, phase)?;

        let initial = session.initial_position()?;
        info!("Calibration phase: fixed_moves ({} moves)", moves.len());
        self.emit_event(CalibrationEvent::PhaseStarted {
            phase: "fixed_moves",
            progress: session.progress(),
        });

        let mut displacements = Vec::with_capacity(moves.len());
        for &stage_move in moves {
            let predicted = predict_pixels(&displacements, stage_move);
            let measurement =
                self.measure_at(session, "fixed_moves", initial + stage_move, predicted)?;
            displacements.push(CorrespondencePoint::from_vectors(
                measurement.displacement,
                measurement.stage_position - initial,
            ));
            session.record_corner_point(CorrespondencePoint::from_vectors(
                measurement.displacement,
                measurement.stage_position,
            ));
        }

        let linear = fit_linear(&displacements)?;
        let transform = AffineTransform::from_parts(linear, initial);
        info!(
            "Fixed-move fit: pixel size {:.5}, rotation {:.3}°",
            transform.pixel_size(),
            transform.rotation_degrees()
        );

        self.restore_stage(session)?;
        self.emit_event(CalibrationEvent::Completed { transform });
        Ok(transform)
    }

    /// Perform exactly one phase and return the next.
    ///
    /// Terminal phases are returned unchanged. Errors are returned as-is;
    /// [`run`](Self::run) turns them into `Failed` after restoring the stage.
    pub fn advance(
        &mut self,
        session: &mut CalibrationSession,
        phase: CalibrationPhase,
    ) -> Result<CalibrationPhase, CalibrationError> {
        if phase.is_terminal() {
            return Ok(phase);
        }

        info!("Calibration phase: {}", phase);
        self.emit_event(CalibrationEvent::PhaseStarted {
            phase: phase.name(),
            progress: session.progress(),
        });

        match phase {
            CalibrationPhase::Idle => self.begin(session),
            CalibrationPhase::CapturingReference => self.capture_reference(session),
            CalibrationPhase::SearchingAxis(axis) => self.search_axis(session, axis),
            CalibrationPhase::FirstApproximation => self.first_approximation(session),
            CalibrationPhase::RefiningCorners {
                first_approximation,
            } => self.refine_corners(session, &first_approximation),
            CalibrationPhase::Finalizing { transform } => self.finalize(session, transform),
            terminal @ (CalibrationPhase::Done { .. } | CalibrationPhase::Failed(_)) => {
                Ok(terminal)
            }
        }
    }

    fn begin(
        &mut self,
        session: &mut CalibrationSession,
    ) -> Result<CalibrationPhase, CalibrationError> {
        self.config.validate()?;
        let (x, y) = self.stage.get_position()?;
        session.start(Vector2::new(x, y));
        info!("Initial stage position ({:.4}, {:.4})", x, y);
        Ok(CalibrationPhase::CapturingReference)
    }

    fn capture_reference(
        &mut self,
        session: &mut CalibrationSession,
    ) -> Result<CalibrationPhase, CalibrationError> {
        let initial = session.initial_position()?;
        let frame = self.camera.capture_frame()?;
        let image = zero_based(frame.view());
        let size = ImageSize::of(&image);
        let window_side = self.config.roi.window_side(size);

        let reference = Reference::new(image, window_side, self.config.registration_eps)?;
        match window_side {
            Some(side) => info!("Reference captured ({}), registering {}px window", size, side),
            None => info!("Reference captured ({}), registering full frames", size),
        }
        session.set_reference(reference);
        session.record_search_point(CorrespondencePoint::new(0.0, 0.0, initial.x, initial.y));

        Ok(CalibrationPhase::SearchingAxis(Axis::X))
    }

    /// Exponential-doubling search along one stage axis.
    ///
    /// Each round doubles both the stage step and the running pixel
    /// estimate, moves, and corrects the estimate by the measured residual.
    /// Stops once the next doubling would exceed `max_pixel_displacement`.
    fn search_axis(
        &mut self,
        session: &mut CalibrationSession,
        axis: Axis,
    ) -> Result<CalibrationPhase, CalibrationError> {
        let initial = session.initial_position()?;
        let limit = self.config.max_pixel_displacement;
        let mut step = axis.unit() * self.config.seed_step;
        let mut estimate = Vector2::<f64>::zeros();
        let mut moves = 0;
        let phase_name = CalibrationPhase::SearchingAxis(axis).name();

        for _ in 0..self.config.max_search_iterations {
            if (2.0 * estimate.x).abs() > limit || (2.0 * estimate.y).abs() > limit {
                break;
            }
            step *= 2.0;
            let predicted = estimate * 2.0;

            let measurement = self.measure_at(session, phase_name, initial + step, predicted)?;
            estimate = predicted + measurement.residual;
            moves += 1;
            debug!(
                "Axis {} step {:.4}: estimate ({:.3}, {:.3}) px, residual ({:.3}, {:.3})",
                axis, step.dot(&axis.unit()), estimate.x, estimate.y,
                measurement.residual.x, measurement.residual.y
            );
        }

        let (x, y) = self.stage.get_position()?;
        info!(
            "Axis {} search done after {} moves: ({:.2}, {:.2}) px at stage ({:.4}, {:.4})",
            axis, moves, estimate.x, estimate.y, x, y
        );
        session.record_search_point(CorrespondencePoint::new(estimate.x, estimate.y, x, y));

        Ok(match axis {
            Axis::X => CalibrationPhase::SearchingAxis(Axis::Y),
            Axis::Y => CalibrationPhase::FirstApproximation,
        })
    }

    fn first_approximation(
        &mut self,
        session: &mut CalibrationSession,
    ) -> Result<CalibrationPhase, CalibrationError> {
        let transform = fit_affine(session.search_points())?;
        info!(
            "First approximation: pixel size {:.5}, rotation {:.3}°",
            transform.pixel_size(),
            transform.rotation_degrees()
        );
        session.set_first_approximation(transform);
        self.emit_event(CalibrationEvent::FirstApproximation { transform });

        Ok(CalibrationPhase::RefiningCorners {
            first_approximation: transform,
        })
    }

    /// Measure four corners around the frame center at the stage positions
    /// the first approximation predicts, then fit over what was measured.
    fn refine_corners(
        &mut self,
        session: &mut CalibrationSession,
        first_approximation: &AffineTransform,
    ) -> Result<CalibrationPhase, CalibrationError> {
        let offset = self.config.corner_offset_pixels;
        let corners = [
            (-offset, -offset),
            (-offset, offset),
            (offset, offset),
            (offset, -offset),
        ];

        for (dx, dy) in corners {
            let corner = Vector2::new(dx, dy);
            let target = first_approximation.apply_vector(corner);
            let measurement = self.measure_at(session, "refining_corners", target, corner)?;
            session.record_corner_point(CorrespondencePoint::from_vectors(
                corner + measurement.residual,
                measurement.stage_position,
            ));
        }

        let transform = fit_affine(session.corner_points())?;
        info!(
            "Corner fit: pixel size {:.5}, rotation {:.3}°, skew {:.4} rad, rms {:.4}",
            transform.pixel_size(),
            transform.rotation_degrees(),
            transform.skew(),
            transform.rms_residual(session.corner_points()).unwrap_or(0.0)
        );

        Ok(CalibrationPhase::Finalizing { transform })
    }

    fn finalize(
        &mut self,
        session: &mut CalibrationSession,
        transform: AffineTransform,
    ) -> Result<CalibrationPhase, CalibrationError> {
        self.restore_stage(session)?;
        self.emit_event(CalibrationEvent::Completed { transform });
        Ok(CalibrationPhase::Done { transform })
    }

    /// Move, capture and register, re-capturing on low confidence.
    fn measure_at(
        &mut self,
        session: &mut CalibrationSession,
        phase: &'static str,
        target: Vector2<f64>,
        predicted: Vector2<f64>,
    ) -> Result<Measurement, CalibrationError> {
        self.move_checked(session, target)?;

        let threshold = self.config.min_confidence;
        let mut attempt = 0;
        let estimate = loop {
            let frame = self.camera.capture_frame()?;
            let image = zero_based(frame.view());
            let estimate = session.reference()?.displacement(image.view(), predicted)?;
            if estimate.is_reliable(threshold) {
                break estimate;
            }
            if attempt >= self.config.low_confidence_retries {
                return Err(CalibrationError::RegistrationLowConfidence {
                    confidence: estimate.confidence,
                    threshold,
                });
            }
            attempt += 1;
            warn!(
                "Registration confidence {:.4} below {} at ({:.4}, {:.4}), retry {}",
                estimate.confidence, threshold, target.x, target.y, attempt
            );
            self.emit_event(CalibrationEvent::LowConfidenceRetry {
                attempt,
                confidence: estimate.confidence,
                threshold,
            });
        };

        let (x, y) = self.stage.get_position()?;
        let progress = session.advance_progress();
        let displacement = Vector2::new(estimate.shift_x, estimate.shift_y);
        self.emit_event(CalibrationEvent::Measurement {
            phase,
            progress,
            stage_x: x,
            stage_y: y,
            pixel_dx: displacement.x,
            pixel_dy: displacement.y,
            confidence: estimate.confidence,
        });

        Ok(Measurement {
            displacement,
            residual: displacement - predicted,
            stage_position: Vector2::new(x, y),
        })
    }

    /// Cancellation and safety checks, then the move itself
    fn move_checked(
        &mut self,
        session: &CalibrationSession,
        target: Vector2<f64>,
    ) -> Result<(), CalibrationError> {
        if self.cancel.is_cancelled() {
            return Err(CalibrationError::Cancelled);
        }
        session.check_target(target)?;
        debug!("Moving stage to ({:.4}, {:.4})", target.x, target.y);
        self.stage.move_to(target.x, target.y)?;
        Ok(())
    }

    fn restore_stage(&mut self, session: &CalibrationSession) -> Result<(), CalibrationError> {
        let initial = session.initial_position()?;
        self.stage
            .move_to(initial.x, initial.y)
            .map_err(|e| CalibrationError::RestoreFailed {
                x: initial.x,
                y: initial.y,
                reason: e.to_string(),
            })?;
        info!("Stage restored to ({:.4}, {:.4})", initial.x, initial.y);
        self.emit_event(CalibrationEvent::StageRestored {
            x: initial.x,
            y: initial.y,
        });
        Ok(())
    }

    /// Restore the stage (best effort), report the failure and hand the error back
    fn fail(&mut self, session: &CalibrationSession, error: CalibrationError) -> CalibrationError {
        error!("Calibration failed: {}", error);
        let restore_attempted = matches!(error, CalibrationError::RestoreFailed { .. });
        if session.is_started() && !restore_attempted {
            if let Err(restore_error) = self.restore_stage(session) {
                error!("{}", restore_error);
            }
        }
        self.emit_event(CalibrationEvent::Failed {
            error: error.clone(),
        });
        error
    }

    fn result(session: &CalibrationSession, transform: AffineTransform) -> CalibrationResult {
        let corner_points = session.corner_points().to_vec();
        CalibrationResult {
            transform,
            first_approximation: session.first_approximation().unwrap_or(transform),
            search_points: session.search_points().to_vec(),
            rms_residual: transform.rms_residual(&corner_points),
            corner_points,
            measurements: session.progress(),
        }
    }
}

/// Expected pixel displacement for a stage move, from the moves measured so
/// far. Zero until they span both directions.
fn predict_pixels(measured: &[CorrespondencePoint], stage_move: Vector2<f64>) -> Vector2<f64> {
    fit_linear(measured)
        .ok()
        .and_then(|linear: Matrix2<f64>| linear.try_inverse())
        .map(|inverse| inverse * stage_move)
        .unwrap_or_else(Vector2::zeros)
}
