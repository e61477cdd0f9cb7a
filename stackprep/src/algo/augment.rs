//! Rotated resampling of anisotropic volumes.
//!
//! Output voxels are filled by inverse mapping. Each destination voxel is
//! expressed relative to the output centre in source voxel units, then
//! carried into source space by
//!
//! ```text
//! Contract(Z, 1/zscale) ∘ Rotate(q) ∘ Expand(Z, zscale)
//! ```
//!
//! Stretching Z by `zscale` before rotating makes the rotation act on
//! physically isotropic coordinates; contracting afterwards returns to slice
//! units. Adding the source centre gives the source voxel position.
//!
//! The source must be over-cropped relative to the output. Nothing checks
//! this: destination voxels whose source falls outside the volume stay 0
//! (nearest) or only collect the in-bounds part of their kernel (subpixel).

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView3, Zip};
use serde::{Deserialize, Serialize};

use super::quaternion::Quaternion;

/// How source intensities are read at a non-integer position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    /// Nearest source voxel; keeps label values intact
    #[default]
    Nearest,
    /// Euclidean tent kernel over the 3×3×3 neighbourhood
    Subpixel,
}

/// Sampling options for [`augment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AugmentOptions {
    pub sampling: Sampling,
    /// Stretch the output Z axis over the full source depth instead of
    /// stepping one source slice per output slice
    pub interpolate_z: bool,
}

/// Composite source-space mapping for one rotation
#[derive(Debug, Clone, Copy)]
struct InverseMap {
    matrix: Matrix3<f64>,
    source_centre: Vector3<f64>,
}

impl InverseMap {
    fn new(rotation: &Quaternion, zscale: f64, source_shape: (usize, usize, usize)) -> Self {
        // contract * R * expand, written elementwise so that unrotated axes
        // keep an exact unit scale
        let scale = [1.0, 1.0, zscale];
        let r = rotation.to_rotation_matrix();
        let (depth, height, width) = source_shape;

        Self {
            matrix: Matrix3::from_fn(|i, j| r[(i, j)] * scale[j] / scale[i]),
            source_centre: Vector3::new(
                centre_of(width),
                centre_of(height),
                centre_of(depth),
            ),
        }
    }

    /// Source position (x, y, z) of an offset from the output centre
    fn apply(&self, offset: Vector3<f64>) -> Vector3<f64> {
        self.matrix * offset + self.source_centre
    }
}

fn centre_of(extent: usize) -> f64 {
    (extent as f64 - 1.0) / 2.0
}

/// Rotate and resample `volume` into a `final_xy × final_xy × final_depth`
/// output
///
/// `zscale` is the ratio of Z slice spacing to XY pixel spacing and must be
/// positive. The identity rotation with an output the size of the input
/// reproduces the input exactly in both sampling modes.
pub fn augment(
    volume: &ArrayView3<f32>,
    rotation: &Quaternion,
    final_xy: usize,
    final_depth: usize,
    zscale: f64,
    options: AugmentOptions,
) -> Array3<f32> {
    let mut output = Array3::<f32>::zeros((final_depth, final_xy, final_xy));
    let source_shape = volume.dim();
    if volume.is_empty() || output.is_empty() {
        return output;
    }

    let map = InverseMap::new(rotation, zscale, source_shape);
    let z_step = if options.interpolate_z {
        source_shape.0 as f64 / final_depth as f64
    } else {
        1.0
    };
    let out_xy_centre = centre_of(final_xy);
    let out_z_centre = centre_of(final_depth);

    Zip::indexed(&mut output).for_each(|(z, y, x), v| {
        let offset = Vector3::new(
            x as f64 - out_xy_centre,
            y as f64 - out_xy_centre,
            (z as f64 - out_z_centre) * z_step,
        );
        let source = map.apply(offset);

        *v = match options.sampling {
            Sampling::Nearest => sample_nearest(volume, &source),
            Sampling::Subpixel => sample_subpixel(volume, &source),
        };
    });

    output
}

/// Voxel index of a rounded coordinate, or None when outside `0..extent`
fn index_in(coordinate: f64, extent: usize) -> Option<usize> {
    if coordinate < 0.0 || coordinate > (extent - 1) as f64 {
        None
    } else {
        Some(coordinate as usize)
    }
}

fn sample_nearest(volume: &ArrayView3<f32>, source: &Vector3<f64>) -> f32 {
    let (depth, height, width) = volume.dim();
    match (
        index_in(source.x.round(), width),
        index_in(source.y.round(), height),
        index_in(source.z.round(), depth),
    ) {
        (Some(x), Some(y), Some(z)) => volume[[z, y, x]],
        _ => 0.0,
    }
}

/// Tent-weighted sum over the 3×3×3 neighbourhood of the nearest voxel
///
/// The weight of each neighbour is `max(0, 1 - |offset - frac|)` with the
/// Euclidean norm, where `frac` is the position relative to the nearest
/// voxel. Weights are not renormalised and out-of-bounds neighbours are
/// skipped.
fn sample_subpixel(volume: &ArrayView3<f32>, source: &Vector3<f64>) -> f32 {
    let (depth, height, width) = volume.dim();
    let base = source.map(|c| c.round());
    let frac = source - base;

    let mut total = 0.0f64;
    for dz in -1i32..=1 {
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let offset = Vector3::new(dx as f64, dy as f64, dz as f64);
                let weight = 1.0 - (offset - frac).norm();
                if weight <= 0.0 {
                    continue;
                }
                let neighbour = base + offset;
                if let (Some(x), Some(y), Some(z)) = (
                    index_in(neighbour.x, width),
                    index_in(neighbour.y, height),
                    index_in(neighbour.z, depth),
                ) {
                    total += volume[[z, y, x]] as f64 * weight;
                }
            }
        }
    }

    total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::quaternion::generate_rotation_set;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const NEAREST: AugmentOptions = AugmentOptions {
        sampling: Sampling::Nearest,
        interpolate_z: false,
    };
    const SUBPIXEL: AugmentOptions = AugmentOptions {
        sampling: Sampling::Subpixel,
        interpolate_z: false,
    };

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| (z * 400 + y * 20 + x) as f32)
    }

    fn marker(size: usize, at: (usize, usize, usize)) -> Array3<f32> {
        let mut volume = Array3::zeros((size, size, size));
        volume[[at.2, at.1, at.0]] = 1.0;
        volume
    }

    #[test]
    fn test_identity_is_exact() {
        for shape in [(7, 9, 9), (6, 10, 10)] {
            let volume = ramp(shape);
            for options in [NEAREST, SUBPIXEL] {
                let out = augment(
                    &volume.view(),
                    &Quaternion::identity(),
                    shape.1,
                    shape.0,
                    6.2,
                    options,
                );
                assert_eq!(out, volume, "{options:?} on {shape:?}");
            }
        }
    }

    #[test]
    fn test_quarter_turn_about_z() {
        let volume = marker(9, (6, 4, 4));
        let q = Quaternion::from_axis_angle(&Vector3::z(), FRAC_PI_2);

        for options in [NEAREST, SUBPIXEL] {
            let out = augment(&volume.view(), &q, 9, 9, 1.0, options);
            assert_relative_eq!(out[[4, 2, 4]], 1.0, epsilon = 1e-6);
            assert_relative_eq!(out.sum(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_anisotropy_scales_rotated_axes() {
        // With zscale 2 a quarter turn about X maps source Z offsets to twice
        // the Y offset and Y offsets to half the Z offset
        let volume = marker(9, (4, 2, 4));
        let q = Quaternion::from_axis_angle(&Vector3::x(), FRAC_PI_2);

        let out = augment(&volume.view(), &q, 9, 9, 2.0, NEAREST);
        assert_eq!(out[[5, 4, 4]], 1.0);
        assert_eq!(out[[4, 4, 4]], 0.0);
    }

    #[test]
    fn test_output_shape_and_out_of_bounds_zero() {
        let volume = Array3::from_elem((5, 20, 20), 3.0f32);
        let q = Quaternion::from_axis_angle(&Vector3::z(), 0.7);

        let out = augment(&volume.view(), &q, 14, 5, 6.2, NEAREST);
        assert_eq!(out.dim(), (5, 14, 14));
        // floor(20 / sqrt 2) keeps every rotated XY position in bounds
        assert!(out.iter().all(|&v| v == 3.0));

        let oversized = augment(&volume.view(), &q, 30, 5, 6.2, NEAREST);
        assert_eq!(oversized[[2, 0, 0]], 0.0);
        assert_eq!(oversized[[2, 15, 15]], 3.0);
    }

    #[test]
    fn test_interpolate_z_spans_source_depth() {
        let volume = Array3::from_shape_fn((8, 5, 5), |(z, _, _)| z as f32);
        let options = AugmentOptions {
            sampling: Sampling::Nearest,
            interpolate_z: true,
        };

        let out = augment(&volume.view(), &Quaternion::identity(), 5, 4, 1.0, options);
        let slices: Vec<f32> = (0..4).map(|z| out[[z, 2, 2]]).collect();
        // Output slice centres land on source z = 0.5, 2.5, 4.5, 6.5
        assert_eq!(slices, vec![1.0, 3.0, 5.0, 7.0]);

        let stepped = augment(&volume.view(), &Quaternion::identity(), 5, 4, 1.0, NEAREST);
        let slices: Vec<f32> = (0..4).map(|z| stepped[[z, 2, 2]]).collect();
        assert_eq!(slices, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_subpixel_kernel_weights() {
        let volume = Array3::from_elem((3, 3, 3), 1.0f32);

        // At an exact voxel only the centre contributes
        let centre = sample_subpixel(&volume.view(), &Vector3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(centre, 1.0);

        // Halfway between two voxels each gets weight 0.5 and no other
        // neighbour is within unit distance
        let half = sample_subpixel(&volume.view(), &Vector3::new(1.5, 1.0, 1.0));
        assert_relative_eq!(half, 1.0, epsilon = 1e-6);

        // Off-axis positions are not renormalised
        let corner = sample_subpixel(&volume.view(), &Vector3::new(1.3, 1.3, 1.0));
        let d = 0.3f64 * 2f64.sqrt();
        let expected = (1.0 - d)
            + 2.0 * (1.0 - (0.7f64 * 0.7 + 0.3 * 0.3).sqrt())
            + (1.0 - 0.7 * 2f64.sqrt());
        assert_relative_eq!(corner as f64, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_round_trip_recovers_blob() {
        let volume = shared::test_util::gaussian_blob((21, 21, 21), (10.0, 10.0, 10.0), 5.0, 1.0);

        for q in generate_rotation_set(4, 5).into_iter().skip(1) {
            let forward = augment(&volume.view(), &q, 21, 21, 1.0, NEAREST);
            let back = augment(&forward.view(), &Quaternion { w: q.w, x: -q.x, y: -q.y, z: -q.z }, 21, 21, 1.0, NEAREST);

            let mut error = 0.0f64;
            let mut count = 0usize;
            Zip::indexed(&back)
                .and(&volume)
                .for_each(|(z, y, x), &b, &v| {
                    let r2 = [x, y, z]
                        .iter()
                        .map(|&c| (c as f64 - 10.0).powi(2))
                        .sum::<f64>();
                    if r2 <= 25.0 {
                        error += (b - v).abs() as f64;
                        count += 1;
                    }
                });
            let mean_error = error / count as f64;
            assert!(mean_error < 0.1, "mean error {mean_error} for {q:?}");
        }
    }
}
