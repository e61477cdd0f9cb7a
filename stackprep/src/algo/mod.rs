//! Core algorithms for stack preparation
//!
//! This module provides rotation sampling, region-of-interest search and
//! rotated 3D resampling of anisotropic volumes.

pub mod augment;
pub mod quaternion;
pub mod roi;

pub use augment::{augment, AugmentOptions, Sampling};
pub use quaternion::{generate_rotation_set, Quaternion};
pub use roi::{find_roi, find_roi_centered, Roi, RoiError};
