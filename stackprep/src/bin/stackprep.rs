//! Batch preparation of microscopy stacks
//!
//! Reads a JSON array of source sets, each naming a raw stack and
//! optionally its mask, acquisition log and landmark file:
//!
//! ```json
//! [{"raw": "cell01.tif", "mask": "cell01_mask.tif", "coords": "cell01.txt"}]
//! ```
//!
//! # Usage
//!
//! ```bash
//! stackprep --batch batch.json --config pipe.json --output-dir out/
//! stackprep --batch batch.json --output-dir out/ --num-augs 8 --roi-strategy centered
//! RUST_LOG=debug stackprep --batch batch.json --output-dir out/ --jpeg
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use stackprep::shared_args::{load_config, SharedPipeArgs};
use stackprep::{Pipe, SourceSet};
use std::path::PathBuf;

/// Command line arguments for batch stack preparation
#[derive(Parser, Debug)]
#[command(
    name = "stackprep",
    about = "Locates ROIs in microscopy stacks and writes rotated training augmentations",
    long_about = None
)]
struct Args {
    /// JSON file listing the source sets to process
    #[arg(short, long)]
    batch: PathBuf,

    /// JSON pipe configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the augmentations are written to
    #[arg(short, long, default_value = "augmented")]
    output_dir: PathBuf,

    #[command(flatten)]
    shared: SharedPipeArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.shared.apply(&mut config);
    info!(
        "ROI {}x{}x{}, {} augmentation(s), output {}",
        config.roi_xy,
        config.roi_xy,
        config.roi_depth,
        config.num_augs,
        config.output_size()
    );

    let sets = SourceSet::load_batch(&args.batch)
        .with_context(|| format!("Failed to read batch file {}", args.batch.display()))?;
    info!("Batch of {} source set(s)", sets.len());

    let pipe = Pipe::new(config, &args.output_dir)?;
    let report = pipe.run_batch(&sets);

    let incomplete = report
        .images
        .iter()
        .filter(|image| !image.is_complete())
        .count();
    for (path, error) in &report.skipped {
        warn!("{}: {error}", path.display());
    }
    info!(
        "Wrote augmentations for {} image(s) to {}",
        report.images.len(),
        args.output_dir.display()
    );
    if incomplete > 0 {
        warn!("{incomplete} image(s) had failed augmentations");
    }

    if !sets.is_empty() && report.images.is_empty() {
        bail!("none of the {} source set(s) could be processed", sets.len());
    }
    Ok(())
}
