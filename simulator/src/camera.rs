//! Simulated camera looking at a [`SpotField`] through a stage.

use cal_math::AffineTransform;
use hardware::{CameraInterface, HardwareError};
use nalgebra::{Matrix2, Vector2};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use shared::ImageSize;
use tracing::trace;

use crate::scene::SpotField;
use crate::stage::StagePositionHandle;
use crate::SimulatorError;

/// Ground-truth optics: how far the stage moves per pixel of image motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticalModel {
    /// Stage units per pixel
    pub pixel_size: f64,
    /// Rotation of the pixel axes in stage coordinates, radians
    pub rotation_rad: f64,
}

impl OpticalModel {
    pub fn new(pixel_size: f64, rotation_rad: f64) -> Result<Self, SimulatorError> {
        if !pixel_size.is_finite() || pixel_size <= 0.0 {
            return Err(SimulatorError::InvalidParameter {
                name: "pixel_size",
                value: pixel_size,
            });
        }
        if !rotation_rad.is_finite() {
            return Err(SimulatorError::InvalidParameter {
                name: "rotation_rad",
                value: rotation_rad,
            });
        }
        Ok(Self {
            pixel_size,
            rotation_rad,
        })
    }

    /// Linear map pixel displacement → stage displacement
    pub fn pixel_to_stage(&self) -> Matrix2<f64> {
        let (s, c) = self.rotation_rad.sin_cos();
        Matrix2::new(c, -s, s, c) * self.pixel_size
    }

    /// Linear map stage displacement → pixel displacement
    pub fn stage_to_pixel(&self) -> Matrix2<f64> {
        let (s, c) = self.rotation_rad.sin_cos();
        Matrix2::new(c, s, -s, c) / self.pixel_size
    }

    /// The transform a perfect calibration starting at `initial` would produce
    pub fn ground_truth(&self, initial: Vector2<f64>) -> AffineTransform {
        AffineTransform::from_parts(self.pixel_to_stage(), initial)
    }
}

/// Camera rendering spots displaced by the stage's travel since construction.
pub struct SimulatedCamera {
    size: ImageSize,
    field: SpotField,
    optics: OpticalModel,
    stage: StagePositionHandle,
    /// Stage position at which the field is rendered undisplaced
    origin: Vector2<f64>,
    bias: f64,
    read_noise: Option<Normal<f64>>,
    rng: StdRng,
    frames_captured: usize,
}

impl SimulatedCamera {
    /// Noise-free camera with a bias of 100 DN
    pub fn new(
        size: ImageSize,
        field: SpotField,
        optics: OpticalModel,
        stage: StagePositionHandle,
    ) -> Self {
        let origin = stage.get();
        Self {
            size,
            field,
            optics,
            stage,
            origin,
            bias: 100.0,
            read_noise: None,
            rng: StdRng::seed_from_u64(0),
            frames_captured: 0,
        }
    }

    /// Constant offset and Gaussian read noise (std dev), both in DN
    pub fn with_noise(mut self, bias: f64, read_noise: f64, seed: u64) -> Result<Self, SimulatorError> {
        if !bias.is_finite() {
            return Err(SimulatorError::InvalidParameter {
                name: "bias",
                value: bias,
            });
        }
        self.bias = bias;
        self.read_noise = if read_noise > 0.0 {
            Some(
                Normal::new(0.0, read_noise).map_err(|_| SimulatorError::InvalidParameter {
                    name: "read_noise",
                    value: read_noise,
                })?,
            )
        } else if read_noise == 0.0 {
            None
        } else {
            return Err(SimulatorError::InvalidParameter {
                name: "read_noise",
                value: read_noise,
            });
        };
        self.rng = StdRng::seed_from_u64(seed);
        Ok(self)
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn optics(&self) -> &OpticalModel {
        &self.optics
    }

    pub fn frames_captured(&self) -> usize {
        self.frames_captured
    }

    /// Render the noise-free scene for the current stage position
    pub fn render(&self) -> Array2<f64> {
        let offset = self.optics.stage_to_pixel() * (self.stage.get() - self.origin);
        let mut image = self.size.empty_array();
        self.field.render_into(&mut image, offset);
        image
    }
}

impl CameraInterface for SimulatedCamera {
    type Pixel = u16;

    fn capture_frame(&mut self) -> Result<Array2<u16>, HardwareError> {
        if self.size.is_empty() {
            return Err(HardwareError::Camera(format!(
                "cannot capture a {} frame",
                self.size
            )));
        }

        let mut image = self.render();
        let bias = self.bias;
        match self.read_noise {
            Some(noise) => {
                let rng = &mut self.rng;
                image.mapv_inplace(|v| v + bias + noise.sample(rng));
            }
            None => image.mapv_inplace(|v| v + bias),
        }

        self.frames_captured += 1;
        trace!(frame = self.frames_captured, "Simulated frame captured");
        Ok(image.mapv(|v| v.round().clamp(0.0, u16::MAX as f64) as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SpotFieldParams;
    use crate::stage::SimulatedStage;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use hardware::StageInterface;
    use shared::image_proc::zero_based;
    use shared::registration::{estimate_shift, DEFAULT_EPS};
    use std::f64::consts::FRAC_PI_2;

    fn camera_on(stage: &SimulatedStage, optics: OpticalModel) -> SimulatedCamera {
        let size = ImageSize::from_width_height(128, 128);
        let field = SpotField::random(size, &SpotFieldParams::default(), 3);
        SimulatedCamera::new(size, field, optics, stage.position_handle())
    }

    #[test]
    fn test_optical_model_matrices_are_inverse() {
        let optics = OpticalModel::new(0.25, 0.3).unwrap();
        let product = optics.pixel_to_stage() * optics.stage_to_pixel();
        assert_relative_eq!(product, Matrix2::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_ground_truth_transform() {
        let optics = OpticalModel::new(2.0, FRAC_PI_2).unwrap();
        let truth = optics.ground_truth(Vector2::new(10.0, 20.0));
        let (sx, sy) = truth.apply(1.0, 0.0);
        assert_relative_eq!(sx, 10.0, epsilon = 1e-12);
        assert_relative_eq!(sy, 22.0, epsilon = 1e-12);
        assert_relative_eq!(truth.pixel_size(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(truth.rotation(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_optics() {
        assert!(OpticalModel::new(0.0, 0.0).is_err());
        assert!(OpticalModel::new(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_frame_moves_with_stage() {
        let mut stage = SimulatedStage::new(0.0, 0.0);
        let mut camera = camera_on(&stage, OpticalModel::new(0.5, 0.0).unwrap());

        let before = camera.capture_frame().unwrap();
        stage.move_to(5.0, -2.0).unwrap();
        let after = camera.capture_frame().unwrap();

        let estimate = estimate_shift(
            zero_based(before.view()).view(),
            zero_based(after.view()).view(),
            DEFAULT_EPS,
        )
        .unwrap();
        assert_abs_diff_eq!(estimate.shift_x, 10.0, epsilon = 0.2);
        assert_abs_diff_eq!(estimate.shift_y, -4.0, epsilon = 0.2);
        assert_eq!(camera.frames_captured(), 2);
    }

    #[test]
    fn test_bias_and_noise() {
        let stage = SimulatedStage::new(0.0, 0.0);
        let size = ImageSize::from_width_height(64, 32);
        let mut camera = SimulatedCamera::new(
            size,
            SpotField::empty(),
            OpticalModel::new(1.0, 0.0).unwrap(),
            stage.position_handle(),
        )
        .with_noise(500.0, 2.0, 9)
        .unwrap();

        let frame = camera.capture_frame().unwrap();
        assert_eq!(frame.dim(), (32, 64));
        let mean = frame.iter().map(|&v| v as f64).sum::<f64>() / frame.len() as f64;
        assert_abs_diff_eq!(mean, 500.0, epsilon = 0.5);
        assert!(frame.iter().any(|&v| v != 500));
    }

    #[test]
    fn test_flat_camera_without_noise() {
        let stage = SimulatedStage::new(0.0, 0.0);
        let mut camera = SimulatedCamera::new(
            ImageSize::from_width_height(16, 16),
            SpotField::empty(),
            OpticalModel::new(1.0, 0.0).unwrap(),
            stage.position_handle(),
        );
        let frame = camera.capture_frame().unwrap();
        assert!(frame.iter().all(|&v| v == 100));
    }

    #[test]
    fn test_invalid_noise() {
        let stage = SimulatedStage::new(0.0, 0.0);
        let camera = camera_on(&stage, OpticalModel::new(1.0, 0.0).unwrap());
        assert!(camera.with_noise(100.0, -1.0, 0).is_err());
    }
}
