//! Dense volume primitives.
//!
//! Volumes are `ndarray::Array3` values laid out as (depth, height, width).
//! Every operation here returns a freshly owned array; inputs are only
//! borrowed, so no output ever aliases its source.
//!
//! The set is deliberately small: crop, resize, type conversion, Z projection,
//! vertical flip, and interleaved channel splitting/summing. That is what the
//! preparation pipe consumes.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use num_traits::{NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::volume_size::VolumeSize;

/// Errors raised by volume primitives
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VolumeError {
    #[error("crop {window} at ({x}, {y}, {z}) exceeds volume {volume}")]
    CropOutOfBounds {
        x: usize,
        y: usize,
        z: usize,
        window: VolumeSize,
        volume: VolumeSize,
    },
    #[error("cannot resize to empty size {0}")]
    EmptyTarget(VolumeSize),
    #[error("stack of {pages} pages is not divisible into {channels} channels")]
    ChannelMismatch { pages: usize, channels: usize },
}

/// Reduction applied along Z by [`project`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Sum of all slices
    Sum,
    /// Per-pixel maximum over all slices
    MaxIntensity,
}

/// Interpolation used by [`resize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMethod {
    /// Nearest source voxel; preserves label values
    Nearest,
    /// Trilinear blend of the eight surrounding voxels
    Linear,
}

/// Copy a `w × h × d` sub-volume starting at `(x, y, z)`
pub fn crop<T: Clone>(
    volume: &ArrayView3<T>,
    x: usize,
    y: usize,
    z: usize,
    window: VolumeSize,
) -> Result<Array3<T>, VolumeError> {
    let (depth, height, width) = volume.dim();
    if x + window.width > width || y + window.height > height || z + window.depth > depth {
        return Err(VolumeError::CropOutOfBounds {
            x,
            y,
            z,
            window,
            volume: VolumeSize::from_shape(volume.dim()),
        });
    }

    Ok(volume
        .slice(s![
            z..z + window.depth,
            y..y + window.height,
            x..x + window.width
        ])
        .to_owned())
}

/// Convert every voxel to another numeric type, saturating at the target range
///
/// Floats are rounded before conversion to integer types.
pub fn convert<S, T>(volume: &ArrayView3<S>) -> Array3<T>
where
    S: ToPrimitive + Copy,
    T: NumCast + num_traits::Bounded + Copy,
{
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    let integral = T::from(0.5f64).and_then(|h| h.to_f64()) == Some(0.0);

    volume.mapv(|v| {
        let mut value = v.to_f64().unwrap_or(0.0);
        if integral {
            value = value.round();
        }
        let value = if value.is_nan() { 0.0 } else { value.clamp(lo, hi) };
        T::from(value).unwrap_or_else(T::min_value)
    })
}

/// Reduce a volume to a 2D image along Z
pub fn project(volume: &ArrayView3<f32>, projection: Projection) -> Array2<f32> {
    let (_, height, width) = volume.dim();
    if volume.len_of(Axis(0)) == 0 {
        return Array2::zeros((height, width));
    }

    match projection {
        Projection::Sum => volume.sum_axis(Axis(0)),
        Projection::MaxIntensity => {
            volume.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
        }
    }
}

/// Flip rows of every Z slice in place (top row becomes bottom row)
pub fn flip_vertical<T: Clone>(volume: &mut Array3<T>) {
    volume.invert_axis(Axis(1));
    // invert_axis only changes strides; materialise standard layout
    if !volume.is_standard_layout() {
        let flipped = volume.as_standard_layout().into_owned();
        *volume = flipped;
    }
}

/// Resize a volume to `target`
///
/// Sample positions are aligned on voxel centres, so resizing to the same
/// size is an exact copy.
pub fn resize(
    volume: &ArrayView3<f32>,
    target: VolumeSize,
    method: ResizeMethod,
) -> Result<Array3<f32>, VolumeError> {
    if target.is_empty() {
        return Err(VolumeError::EmptyTarget(target));
    }
    let source = VolumeSize::from_shape(volume.dim());
    if source.is_empty() {
        return Ok(target.empty_array());
    }

    let scale = |dst: usize, src: usize| src as f64 / dst as f64;
    let (sz, sy, sx) = (
        scale(target.depth, source.depth),
        scale(target.height, source.height),
        scale(target.width, source.width),
    );
    let centre = |i: usize, s: f64, n: usize| {
        ((i as f64 + 0.5) * s - 0.5).clamp(0.0, n as f64 - 1.0)
    };

    let mut out = target.empty_array::<f32>();
    Zip::indexed(&mut out).for_each(|(z, y, x), v| {
        let fz = centre(z, sz, source.depth);
        let fy = centre(y, sy, source.height);
        let fx = centre(x, sx, source.width);

        *v = match method {
            ResizeMethod::Nearest => {
                volume[[fz.round() as usize, fy.round() as usize, fx.round() as usize]]
            }
            ResizeMethod::Linear => trilinear(volume, fz, fy, fx),
        };
    });

    Ok(out)
}

/// 2D resize with the same centre alignment as [`resize`]
pub fn resize_2d(
    image: &ArrayView2<f32>,
    width: usize,
    height: usize,
    method: ResizeMethod,
) -> Result<Array2<f32>, VolumeError> {
    let volume = image.view().insert_axis(Axis(0));
    let resized = resize(&volume, VolumeSize::new(width, height, 1), method)?;
    Ok(resized.index_axis_move(Axis(0), 0))
}

fn trilinear(volume: &ArrayView3<f32>, fz: f64, fy: f64, fx: f64) -> f32 {
    let (depth, height, width) = volume.dim();
    let (z0, y0, x0) = (fz.floor() as usize, fy.floor() as usize, fx.floor() as usize);
    let (z1, y1, x1) = (
        (z0 + 1).min(depth - 1),
        (y0 + 1).min(height - 1),
        (x0 + 1).min(width - 1),
    );
    let (tz, ty, tx) = (fz - z0 as f64, fy - y0 as f64, fx - x0 as f64);

    let lerp = |a: f32, b: f32, t: f64| a as f64 * (1.0 - t) + b as f64 * t;
    let plane = |z: usize| {
        let top = lerp(volume[[z, y0, x0]], volume[[z, y0, x1]], tx);
        let bottom = lerp(volume[[z, y1, x0]], volume[[z, y1, x1]], tx);
        top * (1.0 - ty) + bottom * ty
    };

    (plane(z0) * (1.0 - tz) + plane(z1) * tz) as f32
}

/// Split an interleaved page stack into per-channel volumes
///
/// Page `p` belongs to channel `p % channels` and slice `p / channels`.
pub fn split_channels<T: Clone>(
    stack: &ArrayView3<T>,
    channels: usize,
) -> Result<Vec<Array3<T>>, VolumeError> {
    let pages = stack.len_of(Axis(0));
    if channels == 0 || pages % channels != 0 {
        return Err(VolumeError::ChannelMismatch { pages, channels });
    }

    Ok((0..channels)
        .map(|c| stack.slice(s![c..;channels, .., ..]).to_owned())
        .collect())
}

/// Voxel-wise sum of equally shaped channels as `f32`
pub fn sum_channels<T>(channels: &[Array3<T>]) -> Option<Array3<f32>>
where
    T: ToPrimitive + Copy,
{
    let first = channels.first()?;
    let mut total = Array3::<f32>::zeros(first.dim());
    for channel in channels {
        Zip::from(&mut total)
            .and(channel)
            .for_each(|t, &v| *t += v.to_f32().unwrap_or(0.0));
    }
    Some(total)
}
