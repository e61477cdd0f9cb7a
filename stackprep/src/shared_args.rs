use crate::config::{ConfigError, PipeConfig, RoiStrategy};
use clap::{Args, ValueEnum};
use log::info;
use shared::VolumeSize;
use std::path::{Path, PathBuf};

/// Parse an output size string in format "WIDTHxHEIGHTxDEPTH" (e.g., "64x64x16")
fn parse_volume_size(s: &str) -> Result<VolumeSize, String> {
    let parts: Vec<&str> = s.trim().split(['x', 'X']).collect();
    if parts.len() != 3 {
        return Err("Size must be in format 'WIDTHxHEIGHTxDEPTH'".to_string());
    }

    let mut dims = [0usize; 3];
    for (dim, part) in dims.iter_mut().zip(&parts) {
        *dim = part
            .trim()
            .parse()
            .map_err(|_| format!("Invalid dimension: {}", part))?;
        if *dim == 0 {
            return Err("Dimensions must be greater than zero".to_string());
        }
    }

    Ok(VolumeSize::new(dims[0], dims[1], dims[2]))
}

/// Wrapper for VolumeSize so it can be parsed from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSizeArg(pub VolumeSize);

impl std::str::FromStr for VolumeSizeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_volume_size(s).map(VolumeSizeArg)
    }
}

impl std::fmt::Display for VolumeSizeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.0.width, self.0.height, self.0.depth)
    }
}

/// ROI placement used when no landmark file is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoiStrategyArg {
    /// Brute-force search for the brightest window
    Exhaustive,
    /// Window centred on the brightest voxels
    Centered,
}

impl std::fmt::Display for RoiStrategyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoiStrategyArg::Exhaustive => write!(f, "exhaustive"),
            RoiStrategyArg::Centered => write!(f, "centered"),
        }
    }
}

impl RoiStrategyArg {
    pub fn to_strategy(self) -> RoiStrategy {
        match self {
            RoiStrategyArg::Exhaustive => RoiStrategy::Exhaustive,
            RoiStrategyArg::Centered => RoiStrategy::Centered,
        }
    }
}

/// Command line overrides applied on top of the JSON config
#[derive(Args, Debug, Clone, Default)]
pub struct SharedPipeArgs {
    /// Augmentations per image, including the unrotated one
    #[arg(long)]
    pub num_augs: Option<usize>,

    /// Base seed for the rotation sets
    #[arg(long)]
    pub seed: Option<u64>,

    /// How to place the ROI when no coordinate file is given
    #[arg(long, value_enum)]
    pub roi_strategy: Option<RoiStrategyArg>,

    /// Output size (format: "WIDTHxHEIGHTxDEPTH")
    #[arg(long)]
    pub final_size: Option<VolumeSizeArg>,

    /// Ratio of Z slice spacing to XY pixel spacing
    #[arg(long)]
    pub depth_scale: Option<f64>,

    /// Worker threads for the augmentation fan-out
    #[arg(long)]
    pub workers: Option<usize>,

    /// Estimate the background instead of using the configured cutoff
    #[arg(long, default_value_t = false)]
    pub autoback: bool,

    /// Write 2D projections instead of volumes
    #[arg(long, default_value_t = false)]
    pub flatten: bool,

    /// Write a JPEG preview next to every augmentation
    #[arg(long, default_value_t = false)]
    pub jpeg: bool,

    /// Append one JSON line per completed image to this file
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

impl SharedPipeArgs {
    /// Overwrite the config fields that were given on the command line
    pub fn apply(&self, config: &mut PipeConfig) {
        if let Some(n) = self.num_augs {
            config.num_augs = n;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(strategy) = self.roi_strategy {
            config.roi_strategy = strategy.to_strategy();
        }
        if let Some(VolumeSizeArg(size)) = self.final_size {
            config.final_width = size.width;
            config.final_height = size.height;
            config.final_depth = size.depth;
        }
        if let Some(scale) = self.depth_scale {
            config.depth_scale = scale;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        config.autoback |= self.autoback;
        config.flatten |= self.flatten;
        config.jpeg_previews |= self.jpeg;
        if let Some(manifest) = &self.manifest {
            config.manifest_path = Some(manifest.clone());
        }
    }
}

/// Load the pipe config from `path`, or fall back to defaults
pub fn load_config(path: Option<&Path>) -> Result<PipeConfig, ConfigError> {
    match path {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            PipeConfig::from_json_file(path)
        }
        None => {
            info!("No config file given, using defaults");
            Ok(PipeConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        shared: SharedPipeArgs,
    }

    #[test]
    fn test_volume_size_parsing() {
        assert_eq!(
            parse_volume_size("64x32x16").unwrap(),
            VolumeSize::new(64, 32, 16)
        );
        assert_eq!(
            parse_volume_size(" 8X8x2 ").unwrap(),
            VolumeSize::new(8, 8, 2)
        );

        assert!(parse_volume_size("64x32").is_err());
        assert!(parse_volume_size("64x0x16").is_err());
        assert!(parse_volume_size("axbxc").is_err());

        let arg: VolumeSizeArg = "10x20x3".parse().unwrap();
        assert_eq!(arg.to_string(), "10x20x3");
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let cli = TestCli::try_parse_from([
            "stackprep",
            "--num-augs",
            "5",
            "--roi-strategy",
            "centered",
            "--final-size",
            "32x32x8",
            "--autoback",
            "--workers",
            "2",
        ])
        .unwrap();

        let mut config = PipeConfig {
            seed: 11,
            ..Default::default()
        };
        cli.shared.apply(&mut config);

        assert_eq!(config.num_augs, 5);
        assert_eq!(config.seed, 11);
        assert_eq!(config.roi_strategy, RoiStrategy::Centered);
        assert_eq!(config.output_size(), VolumeSize::new(32, 32, 8));
        assert!(config.autoback);
        assert!(!config.flatten);
        assert_eq!(config.worker_count(), 2);
    }

    #[test]
    fn test_empty_overrides_leave_config_alone() {
        let mut config = PipeConfig {
            flatten: true,
            num_augs: 4,
            ..Default::default()
        };
        let before = config.clone();
        SharedPipeArgs::default().apply(&mut config);
        assert_eq!(config, before);
    }

    #[test]
    fn test_load_config_defaults() {
        assert_eq!(load_config(None).unwrap(), PipeConfig::default());
    }
}
