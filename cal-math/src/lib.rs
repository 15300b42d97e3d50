//! Linear algebra for stage/camera calibration.
//!
//! Fits the affine map from observed pixel displacements to the stage
//! positions that produced them, and exposes the derived diagnostics
//! (pixel size, rotation, skew).

pub mod affine;

pub use affine::{
    fit_affine, fit_linear, AffineFitError, AffineTransform, CorrespondencePoint, MIN_RECIPROCAL_CONDITION,
};
