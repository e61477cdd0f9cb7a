//! Stack and artifact I/O.
//!
//! - [`tiff`]: multi-page grayscale TIFF stacks (raw data, masks, PSFs)
//! - [`fits`]: layered FITS artifacts, one HDU per channel
//! - [`jpeg`]: 8-bit preview images

#[cfg(feature = "fits-writer")]
pub mod fits;
#[cfg(feature = "jpeg-preview")]
pub mod jpeg;
pub mod tiff;

use std::path::PathBuf;
use thiserror::Error;

#[cfg(feature = "fits-writer")]
pub use fits::{read_fits_layers, save_fits_layers, FitsLayer};
#[cfg(feature = "jpeg-preview")]
pub use jpeg::save_jpeg;
pub use tiff::{load_tiff_stack, load_tiff_stack_f32, write_tiff_stack, write_tiff_stack_f32};

/// Errors raised while reading or writing stacks and artifacts
#[derive(Error, Debug)]
pub enum IoError {
    #[error("file does not exist: {0}")]
    FileDoesNotExist(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] ::tiff::TiffError),

    #[error("unsupported sample format in {path}: expected {expected}")]
    UnsupportedSampleFormat {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("page {page} of {path} is {found:?}, expected {expected:?}")]
    InconsistentPages {
        path: PathBuf,
        page: usize,
        found: (u32, u32),
        expected: (u32, u32),
    },

    #[error("stack {0} holds no pages")]
    EmptyStack(PathBuf),

    #[error("cannot write an empty layer '{0}'")]
    EmptyLayer(String),

    #[cfg(feature = "fits-writer")]
    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::compat::errors::Error),

    #[cfg(feature = "fits-writer")]
    #[error("malformed FITS HDU '{0}'")]
    MalformedHdu(String),

    #[cfg(feature = "jpeg-preview")]
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}
