//! 8-bit JPEG previews of projected volumes.

use super::IoError;
use image::{GrayImage, ImageBuffer};
use ndarray::ArrayView2;
use std::path::Path;

/// Scale `image` to 0..=255 by its maximum and save it as a JPEG
///
/// Rows are written top to bottom; callers flip beforehand when they want
/// the FITS orientation. An all-zero image saves as black.
pub fn save_jpeg(path: impl AsRef<Path>, image: &ArrayView2<f32>) -> Result<(), IoError> {
    let (height, width) = image.dim();
    if height == 0 || width == 0 {
        return Err(IoError::EmptyLayer(path.as_ref().display().to_string()));
    }

    let max = image.iter().cloned().fold(0.0f32, f32::max);
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
    let data: Vec<u8> = image
        .iter()
        .map(|&v| (v.max(0.0) * scale).round().min(255.0) as u8)
        .collect();

    let img: GrayImage = ImageBuffer::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| IoError::EmptyLayer(path.as_ref().display().to_string()))?;
    img.save_with_format(path, image::ImageFormat::Jpeg)?;
    Ok(())
}
