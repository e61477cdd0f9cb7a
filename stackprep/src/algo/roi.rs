//! Region-of-interest search over 3D intensity volumes.
//!
//! Two locators are provided:
//!
//! - [`find_roi`]: brute-force windowed-sum search. The XY plane is split
//!   into four overlapping quadrants, each searched by its own worker on a
//!   4-thread pool that lives only for the duration of the call. Candidate
//!   origins advance by 5 voxels in X and Y and by 1 slice in Z, and every
//!   candidate window is summed in full.
//! - [`find_roi_centered`]: single pass that keeps the four brightest sampled
//!   voxels and centres the window on their centroid. Much cheaper, but it
//!   follows a handful of bright voxels rather than regional density.
//!
//! Both are deterministic: the same input always gives the same ROI.

use log::debug;
use ndarray::{s, Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use shared::thread_pool::{JobError, ThreadPool, ThreadPoolError};
use shared::volume::{crop, VolumeError};
use shared::VolumeSize;
use std::sync::Arc;
use thiserror::Error;

/// Stride between candidate origins in X and Y
const XY_STRIDE: usize = 5;

/// Number of bright voxels tracked by [`find_roi_centered`]
const HOTSPOT_COUNT: usize = 4;

/// Errors raised by the ROI locators
#[derive(Error, Debug)]
pub enum RoiError {
    #[error("window {window} does not fit in volume {volume}")]
    WindowExceedsVolume {
        window: VolumeSize,
        volume: VolumeSize,
    },
    #[error("ROI window has a zero extent")]
    EmptyWindow,
    #[error("no signal found: every candidate window sums to zero")]
    NoSignal,
    #[error("failed to start ROI workers: {0}")]
    Pool(#[from] ThreadPoolError),
    #[error("ROI worker failed: {0}")]
    Worker(#[from] JobError),
}

/// Axis-aligned search window and the intensity it encloses
///
/// `origin + extent` never exceeds the volume the ROI was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    /// Edge length in X and Y
    pub xy_dim: usize,
    /// Extent in Z
    pub depth: usize,
    /// Sum of every voxel inside the window
    pub sum: f64,
}

impl Roi {
    /// Window extent as a volume size
    pub fn window(&self) -> VolumeSize {
        VolumeSize::new(self.xy_dim, self.xy_dim, self.depth)
    }

    /// Copy the ROI out of `volume`
    pub fn crop<T: Clone>(&self, volume: &ArrayView3<T>) -> Result<Array3<T>, VolumeError> {
        crop(volume, self.x, self.y, self.z, self.window())
    }

    /// Move the Z origin so the window covers the last `depth` slices
    pub fn pinned_to_bottom(self, volume_depth: usize) -> Self {
        Self {
            z: volume_depth.saturating_sub(self.depth),
            ..self
        }
    }

    /// Window of the given size centred on `centre` = (x, y, z)
    ///
    /// Each origin is `floor(centre - extent / 2)` clamped so the window
    /// stays inside the volume. When `depth` equals the volume depth the Z
    /// origin is 0.
    pub fn centred_on<T>(
        volume: &ArrayView3<T>,
        centre: (f64, f64, f64),
        xy: usize,
        depth: usize,
    ) -> Result<Self, RoiError>
    where
        T: Copy + Into<f64>,
    {
        check_window(volume.dim(), xy, depth)?;
        let (vol_depth, height, width) = volume.dim();

        let place = |c: f64, extent: usize, limit: usize| {
            let origin = (c - extent as f64 / 2.0).floor();
            origin.clamp(0.0, (limit - extent) as f64) as usize
        };

        let x = place(centre.0, xy, width);
        let y = place(centre.1, xy, height);
        let z = if depth == vol_depth {
            0
        } else {
            place(centre.2, depth, vol_depth)
        };

        Ok(Self {
            x,
            y,
            z,
            xy_dim: xy,
            depth,
            sum: window_sum(volume, x, y, z, xy, depth),
        })
    }
}

/// Half-open XY rectangle searched by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
}

/// Top-left, top-right, bottom-left and bottom-right search regions
///
/// Neighbouring regions overlap by `xy / 2` on each side of the midline so
/// windows straddling it are still found.
fn quadrants(width: usize, height: usize, xy: usize) -> [Region; 4] {
    let overlap = xy / 2;
    let left = (0, (width / 2 + overlap).min(width));
    let right = ((width / 2).saturating_sub(overlap), width);
    let top = (0, (height / 2 + overlap).min(height));
    let bottom = ((height / 2).saturating_sub(overlap), height);

    [(left, top), (right, top), (left, bottom), (right, bottom)].map(|((x0, x1), (y0, y1))| {
        Region { x0, x1, y0, y1 }
    })
}

fn check_window(shape: (usize, usize, usize), xy: usize, depth: usize) -> Result<(), RoiError> {
    if xy == 0 || depth == 0 {
        return Err(RoiError::EmptyWindow);
    }
    let volume = VolumeSize::from_shape(shape);
    let window = VolumeSize::new(xy, xy, depth);
    if !volume.contains(&window) {
        return Err(RoiError::WindowExceedsVolume { window, volume });
    }
    Ok(())
}

fn window_sum<T>(
    volume: &ArrayView3<T>,
    x: usize,
    y: usize,
    z: usize,
    xy: usize,
    depth: usize,
) -> f64
where
    T: Copy + Into<f64>,
{
    volume
        .slice(s![z..z + depth, y..y + xy, x..x + xy])
        .iter()
        .map(|&v| v.into())
        .sum()
}

/// Best window inside one region; Z outermost, then Y, then X
fn search_region<T>(volume: &ArrayView3<T>, region: Region, xy: usize, depth: usize) -> Option<Roi>
where
    T: Copy + Into<f64>,
{
    let vol_depth = volume.dim().0;
    let mut best: Option<Roi> = None;

    for z in 0..=vol_depth - depth {
        for y in (region.y0..).step_by(XY_STRIDE) {
            if y + xy > region.y1 {
                break;
            }
            for x in (region.x0..).step_by(XY_STRIDE) {
                if x + xy > region.x1 {
                    break;
                }
                let sum = window_sum(volume, x, y, z, xy, depth);
                if best.map_or(true, |b| sum > b.sum) {
                    best = Some(Roi {
                        x,
                        y,
                        z,
                        xy_dim: xy,
                        depth,
                        sum,
                    });
                }
            }
        }
    }

    best
}

/// Find the `xy × xy × depth` window with the largest intensity sum
///
/// # Errors
/// - [`RoiError::EmptyWindow`] when `xy` or `depth` is zero
/// - [`RoiError::WindowExceedsVolume`] when the window is larger than the volume
/// - [`RoiError::NoSignal`] when the best window sums to zero
pub fn find_roi<T>(volume: &Arc<Array3<T>>, xy: usize, depth: usize) -> Result<Roi, RoiError>
where
    T: Copy + Into<f64> + Send + Sync + 'static,
{
    let (_, height, width) = volume.dim();
    check_window(volume.dim(), xy, depth)?;

    let pool = ThreadPool::with_name(4, "roi")?;
    let handles: Vec<_> = quadrants(width, height, xy)
        .into_iter()
        .map(|region| {
            let volume = Arc::clone(volume);
            pool.submit(move || search_region(&volume.view(), region, xy, depth))
        })
        .collect();

    // Reduce in quadrant order; ties keep the earlier quadrant
    let mut best: Option<Roi> = None;
    for handle in handles {
        if let Some(candidate) = handle.join()? {
            if best.map_or(true, |b| candidate.sum > b.sum) {
                best = Some(candidate);
            }
        }
    }

    let roi = best.ok_or(RoiError::WindowExceedsVolume {
        window: VolumeSize::new(xy, xy, depth),
        volume: VolumeSize::from_shape(volume.dim()),
    })?;
    if roi.sum <= 0.0 {
        return Err(RoiError::NoSignal);
    }

    debug!(
        "ROI {}x{}x{} at ({}, {}, {}) sum {}",
        xy, xy, depth, roi.x, roi.y, roi.z, roi.sum
    );
    Ok(roi)
}

/// Centre the window on the four brightest sampled voxels
///
/// Voxels are sampled every 5 in X and Y and every slice in Z. A voxel
/// enters the buffer only when it is strictly brighter than the dimmest
/// entry, so earlier voxels win ties. Non-positive voxels are never
/// tracked.
pub fn find_roi_centered<T>(volume: &ArrayView3<T>, xy: usize, depth: usize) -> Result<Roi, RoiError>
where
    T: Copy + Into<f64>,
{
    check_window(volume.dim(), xy, depth)?;

    let mut brightest: Vec<(f64, (usize, usize, usize))> = Vec::with_capacity(HOTSPOT_COUNT + 1);
    for ((z, y, x), &v) in volume.slice(s![.., ..;XY_STRIDE, ..;XY_STRIDE]).indexed_iter() {
        let value: f64 = v.into();
        if value <= 0.0 {
            continue;
        }
        let full = brightest.len() == HOTSPOT_COUNT;
        if full && brightest.last().is_some_and(|&(dimmest, _)| value <= dimmest) {
            continue;
        }
        let position = brightest
            .iter()
            .position(|&(b, _)| b < value)
            .unwrap_or(brightest.len());
        brightest.insert(position, (value, (x * XY_STRIDE, y * XY_STRIDE, z)));
        brightest.truncate(HOTSPOT_COUNT);
    }

    if brightest.is_empty() {
        return Err(RoiError::NoSignal);
    }

    let n = brightest.len() as f64;
    let centroid = brightest
        .iter()
        .fold((0.0, 0.0, 0.0), |acc, &(_, (x, y, z))| {
            (acc.0 + x as f64, acc.1 + y as f64, acc.2 + z as f64)
        });
    let centroid = (centroid.0 / n, centroid.1 / n, centroid.2 / n);

    Roi::centred_on(volume, centroid, xy, depth)
}
