//! Pipe configuration.
//!
//! Configuration is read from JSON; every field has a default so partial
//! files are accepted. Command line overrides are applied on top (see
//! [`crate::shared_args`]) before [`PipeConfig::validate`] runs.

use crate::algo::{AugmentOptions, Sampling};
use serde::{Deserialize, Serialize};
use shared::image_proc::BackgroundMode;
use shared::volume::Projection;
use shared::VolumeSize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default ratio of Z slice spacing to XY pixel spacing
pub const DEFAULT_DEPTH_SCALE: f64 = 6.2;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("depth_scale must be positive and finite, got {0}")]
    DepthScale(f64),
    #[error("deconvolution is enabled but no psf_path is set")]
    MissingPsf,
    #[error("roi_xy {0} is too small to leave an output after rotation margin")]
    RoiTooSmall(usize),
}

/// How the ROI is located when no landmark file is supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiStrategy {
    /// Brute-force windowed-sum search
    #[default]
    Exhaustive,
    /// Centroid of the brightest voxels
    Centered,
}

/// Options recognised by the preparation pipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// ROI edge length in X and Y
    pub roi_xy: usize,
    /// ROI extent in Z
    pub roi_depth: usize,
    /// Z anisotropy ratio
    pub depth_scale: f64,
    /// Augmentations per image, including the identity
    pub num_augs: usize,
    /// Fixed background constant, used when `autoback` is off
    pub cutoff: f32,
    /// Estimate the background from the mode of local means
    pub autoback: bool,
    pub deconv: bool,
    pub deconv_rounds: usize,
    pub psf_path: Option<PathBuf>,
    /// Project along Z and write 2D images
    pub flatten: bool,
    /// Use max intensity instead of sum when flattening
    pub max_intensity: bool,
    pub subpixel: bool,
    pub interz: bool,
    /// Keep three mask classes instead of binarising
    pub threeclass: bool,
    /// Take the ROI from the bottom slices of the stack
    pub bottom: bool,
    pub final_width: usize,
    pub final_height: usize,
    pub final_depth: usize,
    /// Interleaved channels in the raw stack
    pub channels: usize,
    pub roi_strategy: RoiStrategy,
    /// Base seed for rotation sets; image `i` uses `seed + i`
    pub seed: u64,
    /// Fan-out pool size; defaults to `num_augs`
    pub workers: Option<usize>,
    pub jpeg_previews: bool,
    pub manifest_path: Option<PathBuf>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            roi_xy: 128,
            roi_depth: 25,
            depth_scale: DEFAULT_DEPTH_SCALE,
            num_augs: 1,
            cutoff: 0.0,
            autoback: false,
            deconv: false,
            deconv_rounds: 10,
            psf_path: None,
            flatten: false,
            max_intensity: false,
            subpixel: false,
            interz: false,
            threeclass: false,
            bottom: false,
            final_width: 64,
            final_height: 64,
            final_depth: 16,
            channels: 1,
            roi_strategy: RoiStrategy::Exhaustive,
            seed: 0,
            workers: None,
            jpeg_previews: false,
            manifest_path: None,
        }
    }
}

impl PipeConfig {
    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Check that the options describe a runnable pipe
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("roi_xy", self.roi_xy),
            ("roi_depth", self.roi_depth),
            ("num_augs", self.num_augs),
            ("final_width", self.final_width),
            ("final_height", self.final_height),
            ("final_depth", self.final_depth),
            ("channels", self.channels),
            ("workers", self.workers.unwrap_or(1)),
        ];
        if let Some(&(name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if !(self.depth_scale.is_finite() && self.depth_scale > 0.0) {
            return Err(ConfigError::DepthScale(self.depth_scale));
        }
        if self.deconv && self.psf_path.is_none() {
            return Err(ConfigError::MissingPsf);
        }
        if self.final_xy() == 0 {
            return Err(ConfigError::RoiTooSmall(self.roi_xy));
        }
        Ok(())
    }

    /// Rotated output edge length: the largest square that stays inside the
    /// ROI at any rotation about Z
    pub fn final_xy(&self) -> usize {
        (self.roi_xy as f64 / std::f64::consts::SQRT_2).floor() as usize
    }

    /// Size every written volume is resized to
    pub fn output_size(&self) -> VolumeSize {
        VolumeSize::new(self.final_width, self.final_height, self.final_depth)
    }

    pub fn background_mode(&self) -> BackgroundMode {
        if self.autoback {
            BackgroundMode::Automatic
        } else {
            BackgroundMode::Fixed(self.cutoff)
        }
    }

    pub fn projection(&self) -> Projection {
        if self.max_intensity {
            Projection::MaxIntensity
        } else {
            Projection::Sum
        }
    }

    /// Sampling for source volumes; masks always use nearest
    pub fn augment_options(&self) -> AugmentOptions {
        AugmentOptions {
            sampling: if self.subpixel {
                Sampling::Subpixel
            } else {
                Sampling::Nearest
            },
            interpolate_z: self.interz,
        }
    }

    pub fn mask_augment_options(&self) -> AugmentOptions {
        AugmentOptions {
            sampling: Sampling::Nearest,
            interpolate_z: self.interz,
        }
    }

    /// Fan-out pool size
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.num_augs).max(1)
    }
}
