//! Layered FITS artifacts.
//!
//! Each layer becomes one image HDU named by its `EXTNAME`. Volumes are
//! written with NAXIS1 = width, NAXIS2 = height, NAXIS3 = depth. Rows are
//! flipped on write and on read because the FITS origin is bottom-left.

use super::IoError;
use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use crate::volume::flip_vertical;
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use std::path::Path;

/// One layer of a FITS artifact
#[derive(Debug, Clone)]
pub enum FitsLayer<'a> {
    /// Full volume (depth, height, width)
    Volume(ArrayView3<'a, f32>),
    /// Single projected image (height, width)
    Image(ArrayView2<'a, f32>),
}

impl FitsLayer<'_> {
    fn dimensions(&self) -> Vec<usize> {
        match self {
            FitsLayer::Volume(v) => {
                let (d, h, w) = v.dim();
                vec![w, h, d]
            }
            FitsLayer::Image(i) => {
                let (h, w) = i.dim();
                vec![w, h]
            }
        }
    }

    fn flipped_data(&self) -> Vec<f32> {
        let mut volume = match self {
            FitsLayer::Volume(v) => v.to_owned(),
            FitsLayer::Image(i) => i.view().insert_axis(Axis(0)).to_owned(),
        };
        flip_vertical(&mut volume);
        volume.into_iter().collect()
    }
}

/// Write named layers to a single FITS file, overwriting any existing file
pub fn save_fits_layers<P: AsRef<Path>>(
    path: P,
    layers: &[(String, FitsLayer<'_>)],
) -> Result<(), IoError> {
    let mut fptr = FitsFile::create(&path).overwrite().open()?;

    for (name, layer) in layers {
        let dimensions = layer.dimensions();
        if dimensions.contains(&0) {
            return Err(IoError::EmptyLayer(name.clone()));
        }

        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions,
        };
        let hdu = fptr.create_image(name, &description)?;
        f32::write_image(&mut fptr, &hdu, &layer.flipped_data())?;
        hdu.write_key(&mut fptr, "EXTNAME", &name.clone())?;
    }

    Ok(())
}

/// Read every image HDU back as (name, volume)
///
/// 2D HDUs load as single-slice volumes.
pub fn read_fits_layers<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Array3<f32>)>, IoError> {
    let fptr = FitsFile::open(&path)?;
    let mut layers = Vec::new();

    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        hdu_idx += 1;
        let name = hdu
            .read_key::<String>(&fptr, "EXTNAME")
            .unwrap_or_else(|_| format!("HDU_{}", hdu_idx - 1));

        let naxis = hdu.read_key::<i64>(&fptr, "NAXIS").unwrap_or(0);
        if naxis < 2 {
            continue;
        }
        let Ok(data) = f64::read_image(&fptr, &hdu) else {
            continue;
        };

        let axis = |key: &str| hdu.read_key::<i64>(&fptr, key).unwrap_or(1).max(1) as usize;
        let width = axis("NAXIS1");
        let height = axis("NAXIS2");
        let depth = if naxis >= 3 { axis("NAXIS3") } else { 1 };

        let mut volume = Array3::from_shape_vec(
            (depth, height, width),
            data.into_iter().map(|v| v as f32).collect(),
        )
        .map_err(|_| IoError::MalformedHdu(name.clone()))?;
        flip_vertical(&mut volume);
        layers.push((name, volume));
    }

    Ok(layers)
}
