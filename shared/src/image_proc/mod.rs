//! Volume processing algorithms shared across the pipeline.
//!
//! - **background**: fixed and automatic (mode of local means) background removal
//! - **deconvolve**: FFT based Richardson-Lucy deconvolution primitive

pub mod background;
pub mod deconvolve;

pub use background::{
    estimate_background_mode, remove_background, subtract_constant, BackgroundError,
    BackgroundMode,
};
pub use deconvolve::{Deconvolve, DeconvolutionError, RichardsonLucy};
