//! Quaternion implementation for 3D rotations
//!
//! Unit quaternions describe the orientation of each augmentation. Sampling
//! is uniform over SO(3) and always driven by an explicit seed, so a rotation
//! set can be regenerated exactly from its seed.

use nalgebra::{Matrix3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// A quaternion representing a rotation in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// Real/scalar component (w)
    pub w: f64,
    /// First complex component (i)
    pub x: f64,
    /// Second complex component (j)
    pub y: f64,
    /// Third complex component (k)
    pub z: f64,
}

impl Quaternion {
    /// The rotation that leaves every vector in place
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Rotation by `angle` radians about the unit vector `axis`
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        let (sin, cos) = (angle / 2.0).sin_cos();
        let v = axis * sin;
        Self {
            w: cos,
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }

    /// Draw a rotation uniformly distributed over SO(3)
    ///
    /// Three independent uniform(0, 1) draws `u1, u2, u3` give
    /// `(sqrt(1-u1) sin 2πu2, sqrt(1-u1) cos 2πu2, sqrt(u1) sin 2πu3, sqrt(u1) cos 2πu3)`
    /// as (x, y, z, w), normalised afterwards to absorb rounding.
    pub fn random_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let u1: f64 = rng.random();
        let u2: f64 = rng.random();
        let u3: f64 = rng.random();

        let a = (1.0 - u1).sqrt();
        let b = u1.sqrt();

        Self {
            w: b * (TAU * u3).cos(),
            x: a * (TAU * u2).sin(),
            y: a * (TAU * u2).cos(),
            z: b * (TAU * u3).sin(),
        }
        .normalize()
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.vector().norm_squared()).sqrt()
    }

    /// Scale to unit length; a zero quaternion becomes the identity
    pub fn normalize(&self) -> Self {
        let norm = self.norm();
        if norm < 1e-10 {
            return Self::identity();
        }
        Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    /// Rotate `v` by the normalised quaternion
    ///
    /// Uses `v + 2w (u × v) + 2 u × (u × v)` with `u` the vector part.
    pub fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let q = self.normalize();
        let u = q.vector();
        let t = u.cross(v) * 2.0;
        v + t * q.w + u.cross(&t)
    }

    /// Rotation matrix whose columns are the rotated basis vectors
    pub fn to_rotation_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[
            self.rotate_vector(&Vector3::x()),
            self.rotate_vector(&Vector3::y()),
            self.rotate_vector(&Vector3::z()),
        ])
    }
}

/// Build the rotation set for one image
///
/// Index 0 is always the identity; indices `1..n` are uniform random
/// rotations drawn from a ChaCha8 generator seeded with `seed`.
pub fn generate_rotation_set(n: usize, seed: u64) -> Vec<Quaternion> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            if i == 0 {
                Quaternion::identity()
            } else {
                Quaternion::random_uniform(&mut rng)
            }
        })
        .collect()
}
