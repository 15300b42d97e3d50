//! Conversion of camera frames to floating point working images.

use ndarray::{Array2, ArrayView2};
use num_traits::ToPrimitive;

/// Convert any numeric frame to an `f64` image.
///
/// Samples that cannot be represented as `f64` become 0.
pub fn to_f64_image<T>(image: ArrayView2<T>) -> Array2<f64>
where
    T: ToPrimitive + Copy,
{
    image.mapv(|v| v.to_f64().unwrap_or(0.0))
}

/// Subtract the image minimum in place so the darkest sample is 0.
///
/// Returns the subtracted value. Empty images are left alone.
pub fn subtract_minimum(image: &mut Array2<f64>) -> f64 {
    let min = image.iter().copied().fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return 0.0;
    }
    image.mapv_inplace(|v| v - min);
    min
}

/// `to_f64_image` followed by `subtract_minimum`
pub fn zero_based<T>(image: ArrayView2<T>) -> Array2<f64>
where
    T: ToPrimitive + Copy,
{
    let mut out = to_f64_image(image);
    subtract_minimum(&mut out);
    out
}
