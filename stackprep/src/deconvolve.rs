//! Deconvolution of volumes with arbitrary depth.
//!
//! The FFT primitive only accepts an even number of slices. For odd-depth
//! volumes the last slice is set aside, the even remainder is deconvolved,
//! and the untouched slice is appended again at its original index.

use log::debug;
use ndarray::{concatenate, s, Array3, ArrayView3, Axis};
use shared::image_proc::{Deconvolve, DeconvolutionError};

/// Deconvolve `volume`, passing an odd trailing slice through unchanged
pub fn deconvolve_volume<D>(
    volume: &ArrayView3<f32>,
    deconvolver: &D,
) -> Result<Array3<f32>, DeconvolutionError>
where
    D: Deconvolve + ?Sized,
{
    let depth = volume.len_of(Axis(0));
    if depth % 2 == 0 {
        return deconvolver.deconvolve(volume);
    }
    if depth == 1 {
        return Ok(volume.to_owned());
    }

    debug!("Odd depth {depth}: holding back slice {}", depth - 1);
    let restored = deconvolver.deconvolve(&volume.slice(s![..depth - 1, .., ..]))?;
    concatenate(
        Axis(0),
        &[restored.view(), volume.slice(s![depth - 1.., .., ..])],
    )
    .map_err(|e| DeconvolutionError::Backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::image_proc::RichardsonLucy;

    /// Doubles every voxel and, like the FFT primitive, refuses odd depth
    struct Doubler;

    impl Deconvolve for Doubler {
        fn deconvolve(
            &self,
            volume: &ArrayView3<f32>,
        ) -> Result<Array3<f32>, DeconvolutionError> {
            let depth = volume.len_of(Axis(0));
            if depth % 2 != 0 {
                return Err(DeconvolutionError::OddDepth(depth));
            }
            Ok(volume.mapv(|v| v * 2.0))
        }
    }

    fn ramp(depth: usize) -> Array3<f32> {
        Array3::from_shape_fn((depth, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32)
    }

    #[test]
    fn test_odd_depth_keeps_last_slice() {
        let volume = ramp(5);
        let out = deconvolve_volume(&volume.view(), &Doubler).unwrap();

        assert_eq!(out.dim(), volume.dim());
        assert_eq!(
            out.slice(s![..4, .., ..]),
            volume.slice(s![..4, .., ..]).mapv(|v| v * 2.0)
        );
        assert_eq!(out.slice(s![4, .., ..]), volume.slice(s![4, .., ..]));
    }

    #[test]
    fn test_even_depth_passes_through() {
        let volume = ramp(4);
        let out = deconvolve_volume(&volume.view(), &Doubler).unwrap();
        assert_eq!(out, volume.mapv(|v| v * 2.0));
    }

    #[test]
    fn test_single_slice_untouched() {
        let volume = ramp(1);
        assert_eq!(deconvolve_volume(&volume.view(), &Doubler).unwrap(), volume);
    }

    #[test]
    fn test_odd_depth_with_richardson_lucy() {
        let mut psf = Array3::zeros((3, 3, 3));
        psf[[1, 1, 1]] = 1.0;
        let rl = RichardsonLucy::new(psf, 2).unwrap();

        let volume = ramp(7).mapv(|v| v + 1.0);
        let out = deconvolve_volume(&volume.view(), &rl).unwrap();
        assert_eq!(out.dim(), (7, 4, 5));
        assert_eq!(out.slice(s![6, .., ..]), volume.slice(s![6, .., ..]));
    }
}
