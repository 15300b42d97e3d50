//! Image preprocessing applied before registration.

pub mod normalize;

pub use normalize::{subtract_minimum, to_f64_image, zero_based};
