//! Random field of Gaussian spots for the simulated camera to look at.

use nalgebra::Vector2;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::ImageSize;

/// A Gaussian spot, positioned in pixels relative to the frame center
/// when the stage sits at its calibration origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spot {
    pub x: f64,
    pub y: f64,
    pub amplitude: f64,
    pub sigma: f64,
}

/// Parameters for [`SpotField::random`]
#[derive(Debug, Clone, PartialEq)]
pub struct SpotFieldParams {
    /// Spots per square pixel
    pub density: f64,
    /// Gaussian sigma, pixels
    pub sigma: f64,
    /// Peak amplitude above bias, DN
    pub amplitude: f64,
    /// Extra field beyond each frame edge, pixels; must cover the largest
    /// image displacement a calibration run produces
    pub margin: f64,
}

impl Default for SpotFieldParams {
    fn default() -> Self {
        Self {
            density: 1.0 / 400.0,
            sigma: 1.2,
            amplitude: 100.0,
            margin: 300.0,
        }
    }
}

/// Static scene of spots
#[derive(Debug, Clone, Default)]
pub struct SpotField {
    spots: Vec<Spot>,
}

impl SpotField {
    pub fn new(spots: Vec<Spot>) -> Self {
        Self { spots }
    }

    /// Featureless scene: frames are pure bias plus noise
    pub fn empty() -> Self {
        Self::default()
    }

    /// Uniformly scattered spots covering the frame plus `params.margin`
    pub fn random(size: ImageSize, params: &SpotFieldParams, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let half_w = size.width as f64 / 2.0 + params.margin;
        let half_h = size.height as f64 / 2.0 + params.margin;
        if half_w <= 0.0 || half_h <= 0.0 {
            return Self::empty();
        }
        let count = (4.0 * half_w * half_h * params.density) as usize;

        let spots = (0..count)
            .map(|_| Spot {
                x: rng.random_range(-half_w..half_w),
                y: rng.random_range(-half_h..half_h),
                amplitude: params.amplitude,
                sigma: params.sigma,
            })
            .collect();
        Self { spots }
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// Add every spot, displaced by `offset` pixels, onto `image`.
    ///
    /// Each spot is drawn out to ±4σ.
    pub fn render_into(&self, image: &mut Array2<f64>, offset: Vector2<f64>) {
        let (rows, cols) = image.dim();
        let (center_x, center_y) = ((cols / 2) as f64, (rows / 2) as f64);

        for spot in &self.spots {
            let x = center_x + spot.x + offset.x;
            let y = center_y + spot.y + offset.y;
            let reach = (4.0 * spot.sigma) as isize + 1;
            let (xi, yi) = (x.floor() as isize, y.floor() as isize);

            let r0 = (yi - reach).max(0);
            let r1 = (yi + reach + 1).min(rows as isize);
            let c0 = (xi - reach).max(0);
            let c1 = (xi + reach + 1).min(cols as isize);
            if r0 >= r1 || c0 >= c1 {
                continue;
            }

            let two_sigma_sq = 2.0 * spot.sigma * spot.sigma;
            for r in r0..r1 {
                let dy = r as f64 - y;
                for c in c0..c1 {
                    let dx = c as f64 - x;
                    image[[r as usize, c as usize]] +=
                        spot.amplitude * (-(dx * dx + dy * dy) / two_sigma_sq).exp();
                }
            }
        }
    }
}
