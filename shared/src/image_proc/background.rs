//! Background removal for fluorescence volumes.
//!
//! Provides the two background models used before augmentation:
//! - Fixed subtraction of a known noise constant
//! - Automatic estimation from the statistical mode of local 3×3×3 means
//!
//! # Automatic Estimation
//!
//! Every interior voxel (a one voxel border is skipped on all axes) is
//! replaced by the mean of its 27 neighbours, rounded to the nearest integer.
//! The most frequent rounded mean is taken as the background level. Local
//! averaging suppresses shot noise while the mode ignores compact bright
//! structures, so a volume of constant `C` with sparse bright blobs yields
//! exactly `C`.
//!
//! # Performance
//!
//! The histogram is accumulated per Z slice in parallel via rayon and merged
//! afterwards. Candidate values are integral, so the merge is exact and the
//! estimate does not depend on thread scheduling.

use log::debug;
use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised during background estimation
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BackgroundError {
    #[error("volume {0:?} is too small for 3x3x3 neighbourhoods")]
    VolumeTooSmall((usize, usize, usize)),
}

/// How the background level is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Subtract a known constant
    Fixed(f32),
    /// Estimate the constant from the mode of local means
    Automatic,
}

/// Subtract `constant` from every voxel, clamping at zero
///
/// # Example
/// ```
/// use ndarray::Array3;
/// use shared::image_proc::background::subtract_constant;
///
/// let vol = Array3::from_elem((2, 2, 2), 10.0f32);
/// let out = subtract_constant(&vol.view(), 12.0);
/// assert!(out.iter().all(|&v| v == 0.0));
/// ```
pub fn subtract_constant(volume: &ArrayView3<f32>, constant: f32) -> Array3<f32> {
    volume.mapv(|v| (v - constant).max(0.0))
}

/// Estimate the background as the mode of rounded 3×3×3 local means
///
/// Ties between equally frequent candidates resolve to the smallest value.
///
/// # Errors
/// Returns [`BackgroundError::VolumeTooSmall`] when any extent is below 3,
/// since no interior voxel exists then.
pub fn estimate_background_mode(volume: &ArrayView3<f32>) -> Result<f32, BackgroundError> {
    let (depth, height, width) = volume.dim();
    if depth < 3 || height < 3 || width < 3 {
        return Err(BackgroundError::VolumeTooSmall(volume.dim()));
    }

    let histogram = (1..depth - 1)
        .into_par_iter()
        .map(|z| slice_histogram(volume, z))
        .reduce(HashMap::new, merge_histograms);

    let (mode, count) = histogram
        .into_iter()
        .max_by(|(va, ca), (vb, cb)| ca.cmp(cb).then(vb.cmp(va)))
        .unwrap_or((0, 0));

    debug!("Background mode {mode} observed {count} times");
    Ok(mode as f32)
}

/// Apply the chosen background model, returning the corrected volume and the
/// level that was subtracted
pub fn remove_background(
    volume: &ArrayView3<f32>,
    mode: BackgroundMode,
) -> Result<(Array3<f32>, f32), BackgroundError> {
    let level = match mode {
        BackgroundMode::Fixed(constant) => constant,
        BackgroundMode::Automatic => estimate_background_mode(volume)?,
    };
    Ok((subtract_constant(volume, level), level))
}

/// Histogram of rounded local means for the interior of slice `z`
fn slice_histogram(volume: &ArrayView3<f32>, z: usize) -> HashMap<i64, usize> {
    let (_, height, width) = volume.dim();
    let mut histogram = HashMap::new();

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sum = 0.0f64;
            for dz in 0..3 {
                for dy in 0..3 {
                    for dx in 0..3 {
                        sum += volume[[z + dz - 1, y + dy - 1, x + dx - 1]] as f64;
                    }
                }
            }
            let candidate = (sum / 27.0).round() as i64;
            *histogram.entry(candidate).or_insert(0) += 1;
        }
    }

    histogram
}

fn merge_histograms(
    mut a: HashMap<i64, usize>,
    b: HashMap<i64, usize>,
) -> HashMap<i64, usize> {
    for (value, count) in b {
        *a.entry(value).or_insert(0) += count;
    }
    a
}
