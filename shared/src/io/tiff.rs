//! Multi-page grayscale TIFF stacks.
//!
//! Page `n` of the file is slice `n` of the volume, so a stack loads as an
//! `Array3` of shape (pages, height, width). Interleaved multi-channel
//! acquisitions load as one long stack; see
//! [`split_channels`](crate::volume::split_channels).

use super::IoError;
use ndarray::{Array3, ArrayView3, Axis};
use std::fs;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};

/// Load a stack of 8 or 16-bit grayscale pages as `u16`
pub fn load_tiff_stack(path: impl AsRef<Path>) -> Result<Array3<u16>, IoError> {
    read_stack(path.as_ref(), "8 or 16-bit grayscale", |page| match page {
        DecodingResult::U8(data) => Some(data.into_iter().map(u16::from).collect()),
        DecodingResult::U16(data) => Some(data),
        _ => None,
    })
}

/// Load a stack of 8-bit, 16-bit or float grayscale pages as `f32`
///
/// Used for point spread functions, which are often stored as floats.
pub fn load_tiff_stack_f32(path: impl AsRef<Path>) -> Result<Array3<f32>, IoError> {
    read_stack(path.as_ref(), "8, 16 or 32-bit grayscale", |page| match page {
        DecodingResult::U8(data) => Some(data.into_iter().map(f32::from).collect()),
        DecodingResult::U16(data) => Some(data.into_iter().map(f32::from).collect()),
        DecodingResult::F32(data) => Some(data),
        _ => None,
    })
}

/// Write a `u16` volume as a multi-page 16-bit TIFF
pub fn write_tiff_stack(path: impl AsRef<Path>, volume: &ArrayView3<u16>) -> Result<(), IoError> {
    write_stack::<colortype::Gray16, u16>(path.as_ref(), volume)
}

/// Write an `f32` volume as a multi-page float TIFF
pub fn write_tiff_stack_f32(
    path: impl AsRef<Path>,
    volume: &ArrayView3<f32>,
) -> Result<(), IoError> {
    write_stack::<colortype::Gray32Float, f32>(path.as_ref(), volume)
}

fn read_stack<T, F>(path: &Path, expected: &'static str, convert: F) -> Result<Array3<T>, IoError>
where
    F: Fn(DecodingResult) -> Option<Vec<T>>,
{
    if !path.exists() {
        return Err(IoError::FileDoesNotExist(path.to_path_buf()));
    }

    let file = fs::File::open(path)?;
    let mut decoder = Decoder::new(file)?;
    let (width, height) = decoder.dimensions()?;
    let page_len = width as usize * height as usize;

    let mut data = Vec::new();
    let mut pages = 0usize;
    loop {
        let dims = decoder.dimensions()?;
        if dims != (width, height) {
            return Err(IoError::InconsistentPages {
                path: path.to_path_buf(),
                page: pages,
                found: dims,
                expected: (width, height),
            });
        }

        let page = convert(decoder.read_image()?)
            .filter(|page| page.len() == page_len)
            .ok_or_else(|| IoError::UnsupportedSampleFormat {
                path: path.to_path_buf(),
                expected,
            })?;
        data.extend(page);
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    if pages == 0 || page_len == 0 {
        return Err(IoError::EmptyStack(path.to_path_buf()));
    }

    Array3::from_shape_vec((pages, height as usize, width as usize), data).map_err(|_| {
        IoError::UnsupportedSampleFormat {
            path: path.to_path_buf(),
            expected,
        }
    })
}

fn write_stack<C, T>(path: &Path, volume: &ArrayView3<T>) -> Result<(), IoError>
where
    C: colortype::ColorType<Inner = T>,
    [T]: tiff::encoder::TiffValue,
    T: Copy,
{
    let (depth, height, width) = volume.dim();
    if depth == 0 || height == 0 || width == 0 {
        return Err(IoError::EmptyLayer(path.display().to_string()));
    }

    let file = fs::File::create(path)?;
    let mut encoder = TiffEncoder::new(file)?;
    for plane in volume.axis_iter(Axis(0)) {
        let page: Vec<T> = plane.iter().copied().collect();
        encoder.write_image::<C>(width as u32, height as u32, &page)?;
    }
    Ok(())
}
