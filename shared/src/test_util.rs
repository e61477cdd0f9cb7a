//! Synthetic volumes for unit and integration tests.
//!
//! All random fixtures take an explicit seed so test runs are reproducible.

use ndarray::{Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Constant volume with `n_blobs` 2×2×2 cubes of `blob_value`
///
/// Blobs are kept two voxels away from every face, so border voxels always
/// hold `background`. Extents below 6 leave the volume blob-free.
pub fn constant_with_blobs(
    size: (usize, usize, usize),
    background: f32,
    blob_value: f32,
    n_blobs: usize,
    seed: u64,
) -> Array3<f32> {
    let (width, height, depth) = size;
    let mut volume = Array3::from_elem((depth, height, width), background);
    if width < 6 || height < 6 || depth < 6 {
        return volume;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for _ in 0..n_blobs {
        let x = rng.random_range(2..width - 3);
        let y = rng.random_range(2..height - 3);
        let z = rng.random_range(2..depth - 3);
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    volume[[z + dz, y + dy, x + dx]] = blob_value;
                }
            }
        }
    }
    volume
}

/// Gaussian noise volume
pub fn normal_volume(size: (usize, usize, usize), mean: f64, std: f64, seed: u64) -> Array3<f32> {
    let (width, height, depth) = size;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(mean, std.max(f64::MIN_POSITIVE)).unwrap();
    Array3::from_shape_simple_fn((depth, height, width), || normal.sample(&mut rng) as f32)
}

/// Isotropic Gaussian blob centred at `centre` = (x, y, z)
pub fn gaussian_blob(
    size: (usize, usize, usize),
    centre: (f64, f64, f64),
    sigma: f64,
    amplitude: f64,
) -> Array3<f32> {
    let (width, height, depth) = size;
    let two_sigma_sq = 2.0 * sigma * sigma;
    Array3::from_shape_fn((depth, height, width), |(z, y, x)| {
        let dx = x as f64 - centre.0;
        let dy = y as f64 - centre.1;
        let dz = z as f64 - centre.2;
        (amplitude * (-(dx * dx + dy * dy + dz * dz) / two_sigma_sq).exp()) as f32
    })
}

/// Zero volume with one bright box of `value` at `origin` = (x, y, z)
///
/// `extent` is (xy, depth) and the box is clipped to the volume.
pub fn hotspot_volume(
    size: (usize, usize, usize),
    origin: (usize, usize, usize),
    extent: (usize, usize),
    value: u16,
) -> Array3<u16> {
    let (width, height, depth) = size;
    let (xy, d) = extent;
    let mut volume = Array3::zeros((depth, height, width));
    for z in origin.2..(origin.2 + d).min(depth) {
        for y in origin.1..(origin.1 + xy).min(height) {
            for x in origin.0..(origin.0 + xy).min(width) {
                volume[[z, y, x]] = value;
            }
        }
    }
    volume
}

/// Solid ellipsoid of `label` on a zero background
///
/// `radii` are (rx, ry, rz) in voxels.
pub fn ellipsoid_mask(
    size: (usize, usize, usize),
    centre: (f64, f64, f64),
    radii: (f64, f64, f64),
    label: u16,
) -> Array3<u16> {
    let (width, height, depth) = size;
    Array3::from_shape_fn((depth, height, width), |(z, y, x)| {
        let nx = (x as f64 - centre.0) / radii.0;
        let ny = (y as f64 - centre.1) / radii.1;
        let nz = (z as f64 - centre.2) / radii.2;
        if nx * nx + ny * ny + nz * nz <= 1.0 {
            label
        } else {
            0
        }
    })
}

/// Fluorescence-like stack: a bright ellipsoid over a noisy floor
pub fn cell_stack(
    size: (usize, usize, usize),
    centre: (f64, f64, f64),
    radii: (f64, f64, f64),
    floor: f64,
    peak: f64,
    seed: u64,
) -> Array3<u16> {
    let mask = ellipsoid_mask(size, centre, radii, 1);
    let noise = normal_volume(size, floor, floor.sqrt(), seed);
    let mut stack = Array3::zeros(mask.dim());
    ndarray::Zip::from(&mut stack)
        .and(&mask)
        .and(&noise)
        .for_each(|out, &m, &n| {
            let v = n as f64 + if m > 0 { peak } else { 0.0 };
            *out = v.clamp(0.0, u16::MAX as f64).round() as u16;
        });
    stack
}

/// Interleave equally shaped channels into one page sequence
///
/// Page `slice * channels + c` holds slice `slice` of channel `c`.
pub fn interleave_channels(channels: &[Array3<u16>]) -> Array3<u16> {
    let Some(first) = channels.first() else {
        return Array3::zeros((0, 0, 0));
    };
    let (depth, height, width) = first.dim();
    let n = channels.len();
    let mut stack = Array3::zeros((depth * n, height, width));
    for (c, channel) in channels.iter().enumerate() {
        for (slice, plane) in channel.axis_iter(Axis(0)).enumerate() {
            stack.index_axis_mut(Axis(0), slice * n + c).assign(&plane);
        }
    }
    stack
}
