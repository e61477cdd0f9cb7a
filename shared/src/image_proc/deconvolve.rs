//! FFT based Richardson-Lucy deconvolution of volumes.
//!
//! The point spread function is zero padded to the volume shape and
//! circularly centred on the origin, so every convolution is a pointwise
//! product in the frequency domain. Transforms are separable: a 1D FFT is
//! run along every lane of each axis in turn.
//!
//! The primitive only accepts volumes with an even number of Z slices.
//! Callers holding odd-depth volumes must split off a slice first.

use log::debug;
use ndarray::{Array3, ArrayView3, Axis, Zip};
use num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};
use thiserror::Error;

/// Floor applied to the re-blurred estimate before dividing
const RATIO_EPSILON: f64 = 1e-12;

/// Errors raised by deconvolution
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeconvolutionError {
    #[error("deconvolution requires an even depth, got {0} slices")]
    OddDepth(usize),
    #[error("point spread function has no positive mass")]
    EmptyPsf,
    #[error("point spread function {psf:?} does not fit in volume {volume:?}")]
    PsfTooLarge {
        psf: (usize, usize, usize),
        volume: (usize, usize, usize),
    },
    #[error("deconvolution backend failed: {0}")]
    Backend(String),
}

/// A volume deconvolution routine
///
/// Implementations may reject odd-depth input with
/// [`DeconvolutionError::OddDepth`].
pub trait Deconvolve {
    fn deconvolve(&self, volume: &ArrayView3<f32>) -> Result<Array3<f32>, DeconvolutionError>;
}

/// Richardson-Lucy deconvolution with a fixed PSF and iteration count
#[derive(Debug, Clone)]
pub struct RichardsonLucy {
    psf: Array3<f32>,
    iterations: usize,
}

impl RichardsonLucy {
    /// Build a deconvolver, normalising `psf` to unit sum
    ///
    /// Negative PSF samples are clamped to zero.
    pub fn new(psf: Array3<f32>, iterations: usize) -> Result<Self, DeconvolutionError> {
        let psf = psf.mapv(|v| v.max(0.0));
        let total: f64 = psf.iter().map(|&v| v as f64).sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(DeconvolutionError::EmptyPsf);
        }
        let psf = psf.mapv(|v| (v as f64 / total) as f32);
        Ok(Self { psf, iterations })
    }

    /// Number of Richardson-Lucy iterations
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Transfer function of the PSF for a volume of the given shape
    fn transfer_function(
        &self,
        shape: (usize, usize, usize),
        planner: &mut FftPlanner<f64>,
    ) -> Result<Array3<Complex64>, DeconvolutionError> {
        let (pd, ph, pw) = self.psf.dim();
        let (d, h, w) = shape;
        if pd > d || ph > h || pw > w {
            return Err(DeconvolutionError::PsfTooLarge {
                psf: self.psf.dim(),
                volume: shape,
            });
        }

        // Centre of the PSF lands on voxel (0, 0, 0) with wrap-around
        let mut padded = Array3::<Complex64>::zeros(shape);
        for ((z, y, x), &v) in self.psf.indexed_iter() {
            let tz = (z + d - pd / 2) % d;
            let ty = (y + h - ph / 2) % h;
            let tx = (x + w - pw / 2) % w;
            padded[[tz, ty, tx]] = Complex64::new(v as f64, 0.0);
        }

        fft3(&mut padded, planner, FftDirection::Forward);
        Ok(padded)
    }
}

impl Deconvolve for RichardsonLucy {
    fn deconvolve(&self, volume: &ArrayView3<f32>) -> Result<Array3<f32>, DeconvolutionError> {
        let shape = volume.dim();
        if shape.0 % 2 != 0 {
            return Err(DeconvolutionError::OddDepth(shape.0));
        }

        let mut planner = FftPlanner::new();
        let otf = self.transfer_function(shape, &mut planner)?;
        let otf_conj = otf.mapv(|c| c.conj());

        let observed = volume.mapv(|v| (v as f64).max(0.0));
        let mut estimate = observed.clone();

        for iteration in 0..self.iterations {
            let blurred = convolve(&estimate, &otf, &mut planner);
            let mut ratio = observed.clone();
            Zip::from(&mut ratio)
                .and(&blurred)
                .for_each(|r, &b| *r /= b.max(RATIO_EPSILON));

            let correction = convolve(&ratio, &otf_conj, &mut planner);
            Zip::from(&mut estimate)
                .and(&correction)
                .for_each(|e, &c| *e = (*e * c).max(0.0));

            debug!("Richardson-Lucy iteration {} of {}", iteration + 1, self.iterations);
        }

        Ok(estimate.mapv(|v| v as f32))
    }
}

/// Circular convolution of a real volume with a transfer function
fn convolve(
    volume: &Array3<f64>,
    transfer: &Array3<Complex64>,
    planner: &mut FftPlanner<f64>,
) -> Array3<f64> {
    let mut spectrum = volume.mapv(|v| Complex64::new(v, 0.0));
    fft3(&mut spectrum, planner, FftDirection::Forward);
    Zip::from(&mut spectrum)
        .and(transfer)
        .for_each(|s, &t| *s *= t);
    fft3(&mut spectrum, planner, FftDirection::Inverse);
    spectrum.mapv(|c| c.re)
}

/// Separable 3D FFT; the inverse is scaled by 1/N
fn fft3(data: &mut Array3<Complex64>, planner: &mut FftPlanner<f64>, direction: FftDirection) {
    for axis in 0..3 {
        let len = data.len_of(Axis(axis));
        if len <= 1 {
            continue;
        }
        let fft = planner.plan_fft(len, direction);
        let mut buffer = vec![Complex64::new(0.0, 0.0); len];

        for mut lane in data.lanes_mut(Axis(axis)) {
            buffer
                .iter_mut()
                .zip(lane.iter())
                .for_each(|(b, &v)| *b = v);
            fft.process(&mut buffer);
            lane.iter_mut().zip(buffer.iter()).for_each(|(v, &b)| *v = b);
        }
    }

    if direction == FftDirection::Inverse {
        let scale = 1.0 / data.len() as f64;
        data.mapv_inplace(|c| c * scale);
    }
}
