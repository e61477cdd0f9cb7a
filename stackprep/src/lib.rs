//! Preparation of volumetric microscopy stacks for training
//!
//! This crate locates a region of interest in each raw stack, removes
//! background, optionally deconvolves, and writes a set of rotated and
//! resized augmentations for the source and its annotation mask.

pub mod algo;
/// JSON pipe configuration and validation
pub mod config;
/// Landmark coordinate files
pub mod coords;
/// Depth-parity adapter around a deconvolution primitive
pub mod deconvolve;
pub mod manifest;
/// Per-image orchestration and augmentation fan-out
pub mod pipe;
/// Command line arguments shared by the binaries
pub mod shared_args;

pub use config::{PipeConfig, RoiStrategy};
pub use pipe::{BatchReport, ImageReport, Pipe, PipeError, SourceSet};
