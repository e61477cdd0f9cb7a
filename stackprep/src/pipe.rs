//! Per-image preparation pipe.
//!
//! For every source set the pipe runs
//!
//! ```text
//! LOAD -> LOCATE_ROI -> CROP -> BACKGROUND -> [DECONVOLVE]
//!      -> for each rotation i: ROTATE -> PROJECT_OR_RESIZE -> WRITE
//! ```
//!
//! One rotation set is drawn per image before any stage runs; the mask and
//! source stages both take it, so augmentation `i` of the mask and of the
//! source share a rotation. Both stages fan their augmentations out over a
//! thread pool, the mask stage first.
//! Every job reads the same immutable, reference-counted inputs and writes
//! its own file. The pipe waits for every job and reports each one
//! separately, so a failing job never hides its siblings.
//!
//! An error before the fan-out (load, ROI, background, deconvolution, mask
//! shape) skips that image before any artifact is written and the batch
//! continues.

use crate::algo::{augment, find_roi, find_roi_centered, generate_rotation_set, Quaternion, Roi};
use crate::algo::{AugmentOptions, RoiError};
use crate::config::{ConfigError, PipeConfig, RoiStrategy};
use crate::coords::{centroid, load_landmarks, CoordError};
use crate::deconvolve::deconvolve_volume;
use crate::manifest::{append_row, ManifestRow};
use log::{debug, info, warn};
use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use shared::image_proc::{
    remove_background, BackgroundError, DeconvolutionError, RichardsonLucy,
};
use shared::io::{load_tiff_stack, load_tiff_stack_f32, save_fits_layers, save_jpeg};
use shared::io::{FitsLayer, IoError};
use shared::thread_pool::{ThreadPool, ThreadPoolError};
use shared::volume::{
    convert, flip_vertical, project, resize, resize_2d, split_channels, sum_channels, Projection,
    ResizeMethod, VolumeError,
};
use shared::VolumeSize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// FITS layer name used for mask artifacts
const MASK_LAYER: &str = "MASK";

/// Errors raised while preparing one image
#[derive(Error, Debug)]
pub enum PipeError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Roi(#[from] RoiError),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error(transparent)]
    Deconvolution(#[from] DeconvolutionError),
    #[error(transparent)]
    Coords(#[from] CoordError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] ThreadPoolError),
    #[error("failed to create output directory: {0}")]
    OutputDir(#[source] std::io::Error),
    #[error("mask {mask} does not match source channel {source_size}")]
    ShapeMismatch {
        mask: VolumeSize,
        source_size: VolumeSize,
    },
    #[error("augmentation {index} failed: {message}")]
    JobFailed { index: usize, message: String },
}

/// Pre-paired input files for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet {
    /// Raw multi-page stack, channels interleaved
    pub raw: PathBuf,
    /// Annotation labels matching one channel of `raw`
    #[serde(default)]
    pub mask: Option<PathBuf>,
    /// Acquisition log, recorded in the manifest only
    #[serde(default)]
    pub log: Option<PathBuf>,
    /// Landmark coordinates; when present they place the ROI
    #[serde(default)]
    pub coords: Option<PathBuf>,
}

impl SourceSet {
    pub fn new(raw: impl Into<PathBuf>) -> Self {
        Self {
            raw: raw.into(),
            mask: None,
            log: None,
            coords: None,
        }
    }

    pub fn with_mask(mut self, mask: impl Into<PathBuf>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    pub fn with_coords(mut self, coords: impl Into<PathBuf>) -> Self {
        self.coords = Some(coords.into());
        self
    }

    /// Load a JSON array of source sets
    pub fn load_batch(path: impl AsRef<Path>) -> Result<Vec<Self>, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn stem(&self) -> String {
        self.raw
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    }
}

/// Tagged result of one fan-out job
#[derive(Debug)]
pub struct JobOutcome<T> {
    pub index: usize,
    pub rotation: Quaternion,
    pub result: Result<T, PipeError>,
}

/// Run `job` once per rotation on a pool of `workers` threads
///
/// Outcomes come back in rotation order whatever order the jobs finish in.
/// A job that returns an error or panics yields a failed outcome for its
/// index only.
pub fn fan_out<T, F>(
    rotations: &Arc<[Quaternion]>,
    workers: usize,
    job: F,
) -> Result<Vec<JobOutcome<T>>, PipeError>
where
    T: Send + 'static,
    F: Fn(usize, &Quaternion) -> Result<T, PipeError> + Send + Sync + 'static,
{
    let pool = ThreadPool::with_name(workers, "augment")?;
    let job = Arc::new(job);

    let handles: Vec<_> = (0..rotations.len())
        .map(|index| {
            let job = Arc::clone(&job);
            let rotations = Arc::clone(rotations);
            pool.submit(move || job(index, &rotations[index]))
        })
        .collect();

    Ok(handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| {
            let result = handle
                .join()
                .map_err(|e| PipeError::JobFailed {
                    index,
                    message: e.to_string(),
                })
                .and_then(|r| r);
            if let Err(e) = &result {
                warn!("Augmentation {index} failed: {e}");
            }
            JobOutcome {
                index,
                rotation: rotations[index],
                result,
            }
        })
        .collect())
}

/// What happened to one image
#[derive(Debug)]
pub struct ImageReport {
    pub source: SourceSet,
    pub roi: Roi,
    pub background: Vec<f32>,
    pub rotations: Vec<Quaternion>,
    pub outputs: Vec<JobOutcome<PathBuf>>,
    pub mask_outputs: Vec<JobOutcome<PathBuf>>,
}

impl ImageReport {
    /// True when every source and mask augmentation was written
    pub fn is_complete(&self) -> bool {
        self.outputs
            .iter()
            .chain(&self.mask_outputs)
            .all(|o| o.result.is_ok())
    }

    fn manifest_row(&self) -> ManifestRow {
        let names = |outcomes: &[JobOutcome<PathBuf>]| {
            outcomes
                .iter()
                .filter_map(|o| o.result.as_ref().ok())
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect()
        };
        ManifestRow {
            source: self.source.raw.clone(),
            mask: self.source.mask.clone(),
            log: self.source.log.clone(),
            roi: self.roi,
            background: self.background.clone(),
            rotations: self.rotations.clone(),
            outputs: names(&self.outputs),
            mask_outputs: names(&self.mask_outputs),
        }
    }
}

/// Outcome of a batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub images: Vec<ImageReport>,
    pub skipped: Vec<(PathBuf, PipeError)>,
}

/// One rendered augmentation channel
enum Rendered {
    Volume(Array3<f32>),
    Image(Array2<f32>),
}

impl Rendered {
    fn layer(&self) -> FitsLayer<'_> {
        match self {
            Rendered::Volume(v) => FitsLayer::Volume(v.view()),
            Rendered::Image(i) => FitsLayer::Image(i.view()),
        }
    }

    /// Max projection for previews
    fn preview(&self) -> Array2<f32> {
        match self {
            Rendered::Volume(v) => project(&v.view(), Projection::MaxIntensity),
            Rendered::Image(i) => i.clone(),
        }
    }
}

/// Prepares source sets according to a [`PipeConfig`]
pub struct Pipe {
    config: Arc<PipeConfig>,
    output_dir: PathBuf,
    deconvolver: Option<Arc<RichardsonLucy>>,
}

impl Pipe {
    /// Validate `config`, load the PSF when deconvolution is enabled and
    /// create `output_dir`
    pub fn new(config: PipeConfig, output_dir: impl Into<PathBuf>) -> Result<Self, PipeError> {
        config.validate()?;
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).map_err(PipeError::OutputDir)?;

        let deconvolver = match (&config.psf_path, config.deconv) {
            (Some(psf_path), true) => {
                let psf = load_tiff_stack_f32(psf_path)?;
                info!("Loaded PSF {} from {}", VolumeSize::of(&psf), psf_path.display());
                Some(Arc::new(RichardsonLucy::new(psf, config.deconv_rounds)?))
            }
            _ => None,
        };

        Ok(Self {
            config: Arc::new(config),
            output_dir,
            deconvolver,
        })
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Process every source set, skipping images that fail before fan-out
    pub fn run_batch(&self, sets: &[SourceSet]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, set) in sets.iter().enumerate() {
            match self.process(set, index) {
                Ok(image) => {
                    if image.is_complete() {
                        if let Some(manifest) = &self.config.manifest_path {
                            if let Err(e) = append_row(manifest, &image.manifest_row()) {
                                warn!("Failed to record {} in manifest: {e}", set.raw.display());
                            }
                        }
                    }
                    report.images.push(image);
                }
                Err(e) => {
                    warn!("Skipping {}: {e}", set.raw.display());
                    report.skipped.push((set.raw.clone(), e));
                }
            }
        }

        info!(
            "Batch finished: {} processed, {} skipped",
            report.images.len(),
            report.skipped.len()
        );
        report
    }

    /// Prepare one image; `image_index` offsets the rotation seed
    pub fn process(&self, set: &SourceSet, image_index: usize) -> Result<ImageReport, PipeError> {
        let config = &self.config;
        info!("Loading {}", set.raw.display());
        let stack = load_tiff_stack(&set.raw)?;
        let channels = split_channels(&stack.view(), config.channels)?;
        let channel_size = VolumeSize::from_shape(channels[0].dim());

        let roi = self.locate_roi(set, &channels)?;
        info!(
            "ROI {} at ({}, {}, {}) sum {:.0}",
            roi.window(),
            roi.x,
            roi.y,
            roi.z,
            roi.sum
        );

        let seed = config.seed.wrapping_add(image_index as u64);
        let stem = set.stem();

        let rotations: Arc<[Quaternion]> = Arc::from(generate_rotation_set(config.num_augs, seed));

        // Everything that can fail per image runs before the first artifact is written
        let (prepared, background) = self.prepare_channels(&channels, &roi)?;

        let mask_outputs = match &set.mask {
            Some(mask_path) => {
                self.process_mask(mask_path, channel_size, &roi, &rotations, &stem)?
            }
            None => Vec::new(),
        };
        let outputs = self.process_source(prepared, &rotations, &stem)?;

        Ok(ImageReport {
            source: set.clone(),
            roi,
            background,
            rotations: rotations.to_vec(),
            outputs,
            mask_outputs,
        })
    }

    fn locate_roi(&self, set: &SourceSet, channels: &[Array3<u16>]) -> Result<Roi, PipeError> {
        let config = &self.config;
        let (xy, depth) = (config.roi_xy, config.roi_depth);
        let summed = Arc::new(sum_channels(channels).ok_or(VolumeError::ChannelMismatch {
            pages: 0,
            channels: config.channels,
        })?);

        let roi = match &set.coords {
            Some(coords) => {
                let landmarks = load_landmarks(coords)?;
                let centre = centroid(&landmarks).ok_or(CoordError::NoLandmarks)?;
                debug!("Centring ROI on {} landmarks", landmarks.len());
                Roi::centred_on(&summed.view(), centre, xy, depth)?
            }
            None => match config.roi_strategy {
                RoiStrategy::Exhaustive => find_roi(&summed, xy, depth)?,
                RoiStrategy::Centered => find_roi_centered(&summed.view(), xy, depth)?,
            },
        };

        if !config.bottom {
            return Ok(roi);
        }
        let pinned = roi.pinned_to_bottom(summed.len_of(Axis(0)));
        let sum = pinned.crop(&summed.view())?.iter().map(|&v| v as f64).sum();
        Ok(Roi { sum, ..pinned })
    }

    /// Crop, background-correct and optionally deconvolve every channel
    fn prepare_channels(
        &self,
        channels: &[Array3<u16>],
        roi: &Roi,
    ) -> Result<(Arc<Vec<Array3<f32>>>, Vec<f32>), PipeError> {
        let mode = self.config.background_mode();
        let mut prepared = Vec::with_capacity(channels.len());
        let mut levels = Vec::with_capacity(channels.len());

        for (c, channel) in channels.iter().enumerate() {
            let cropped: Array3<f32> = convert(&roi.crop(&channel.view())?.view());
            let (corrected, level) = remove_background(&cropped.view(), mode)?;
            debug!("Channel {c}: background {level}");

            let corrected = match &self.deconvolver {
                Some(deconvolver) => {
                    info!("Deconvolving channel {c}");
                    deconvolve_volume(&corrected.view(), deconvolver.as_ref())?
                }
                None => corrected,
            };
            prepared.push(corrected);
            levels.push(level);
        }

        Ok((Arc::new(prepared), levels))
    }

    fn process_mask(
        &self,
        mask_path: &Path,
        channel_size: VolumeSize,
        roi: &Roi,
        rotations: &Arc<[Quaternion]>,
        stem: &str,
    ) -> Result<Vec<JobOutcome<PathBuf>>, PipeError> {
        let config = Arc::clone(&self.config);
        let mask = load_tiff_stack(mask_path)?;
        let mask_size = VolumeSize::of(&mask);
        if mask_size != channel_size {
            return Err(PipeError::ShapeMismatch {
                mask: mask_size,
                source_size: channel_size,
            });
        }

        let threeclass = config.threeclass;
        let labels = roi.crop(&mask.view())?.mapv(|v| relabel(v, threeclass));
        let labels = Arc::new(labels);

        info!("Augmenting mask {} x{}", mask_path.display(), rotations.len());

        let dir = self.output_dir.clone();
        let stem = stem.to_string();
        fan_out(rotations, config.worker_count(), move |index, rotation| {
            debug!("Mask augmentation {index}");
            let rendered = render(
                &labels.view(),
                rotation,
                &config,
                config.mask_augment_options(),
                ResizeMethod::Nearest,
            )?;
            let path = dir.join(format!("{stem}_mask_aug{index:03}.fits"));
            save_fits_layers(&path, &[(MASK_LAYER.to_string(), rendered.layer())])?;
            Ok(path)
        })
    }

    fn process_source(
        &self,
        channels: Arc<Vec<Array3<f32>>>,
        rotations: &Arc<[Quaternion]>,
        stem: &str,
    ) -> Result<Vec<JobOutcome<PathBuf>>, PipeError> {
        let config = Arc::clone(&self.config);
        let dir = self.output_dir.clone();
        let stem = stem.to_string();
        info!("Augmenting {} channel(s) x{}", channels.len(), rotations.len());

        fan_out(rotations, config.worker_count(), move |index, rotation| {
            debug!("Source augmentation {index}");
            let rendered = channels
                .iter()
                .map(|channel| {
                    render(
                        &channel.view(),
                        rotation,
                        &config,
                        config.augment_options(),
                        ResizeMethod::Linear,
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;

            let layers: Vec<_> = rendered
                .iter()
                .enumerate()
                .map(|(c, r)| (format!("CH{c}"), r.layer()))
                .collect();
            let path = dir.join(format!("{stem}_aug{index:03}.fits"));
            save_fits_layers(&path, &layers)?;

            if config.jpeg_previews {
                if let Some(first) = rendered.first() {
                    // Match the bottom-left origin of the FITS artifact
                    let mut preview = first.preview().insert_axis(Axis(0));
                    flip_vertical(&mut preview);
                    save_jpeg(
                        dir.join(format!("{stem}_aug{index:03}.jpg")),
                        &preview.index_axis(Axis(0), 0),
                    )?;
                }
            }
            Ok(path)
        })
    }
}

/// Collapse mask labels to {0, 1} or, for three-class masks, {0, 1, 2}
fn relabel(label: u16, threeclass: bool) -> f32 {
    match (label, threeclass) {
        (0, _) => 0.0,
        (1, _) | (_, false) => 1.0,
        _ => 2.0,
    }
}

/// Rotate one volume and bring it to the configured output size
fn render(
    volume: &ArrayView3<f32>,
    rotation: &Quaternion,
    config: &PipeConfig,
    options: AugmentOptions,
    method: ResizeMethod,
) -> Result<Rendered, PipeError> {
    // With interz the rotation already samples the final depth, so the
    // resize below only changes X and Y
    let depth = if options.interpolate_z {
        config.final_depth
    } else {
        config.roi_depth
    };
    let rotated = augment(
        volume,
        rotation,
        config.final_xy(),
        depth,
        config.depth_scale,
        options,
    );

    if config.flatten {
        let projection = match method {
            // Summing labels would invent classes
            ResizeMethod::Nearest => Projection::MaxIntensity,
            ResizeMethod::Linear => config.projection(),
        };
        let image = project(&rotated.view(), projection);
        Ok(Rendered::Image(resize_2d(
            &image.view(),
            config.final_width,
            config.final_height,
            method,
        )?))
    } else {
        Ok(Rendered::Volume(resize(
            &rotated.view(),
            config.output_size(),
            method,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::io::{read_fits_layers, write_tiff_stack, write_tiff_stack_f32};
    use shared::test_util::{cell_stack, ellipsoid_mask};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_config() -> PipeConfig {
        PipeConfig {
            roi_xy: 24,
            roi_depth: 6,
            num_augs: 3,
            final_width: 12,
            final_height: 12,
            final_depth: 4,
            roi_strategy: RoiStrategy::Centered,
            seed: 7,
            ..Default::default()
        }
    }

    fn write_fixture(dir: &Path) -> SourceSet {
        let size = (48, 40, 10);
        let stack = cell_stack(size, (24.0, 20.0, 5.0), (6.0, 6.0, 2.0), 100.0, 900.0, 1);
        let mask = ellipsoid_mask(size, (24.0, 20.0, 5.0), (6.0, 6.0, 2.0), 2);
        let raw = dir.join("cell.tif");
        let mask_path = dir.join("cell_mask.tif");
        write_tiff_stack(&raw, &stack.view()).unwrap();
        write_tiff_stack(&mask_path, &mask.view()).unwrap();
        SourceSet::new(raw).with_mask(mask_path)
    }

    #[test]
    fn test_relabel() {
        assert_eq!(relabel(0, false), 0.0);
        assert_eq!(relabel(3, false), 1.0);
        assert_eq!(relabel(1, true), 1.0);
        assert_eq!(relabel(2, true), 2.0);
        assert_eq!(relabel(7, true), 2.0);
    }

    #[test]
    fn test_fan_out_isolates_panics() {
        let rotations: Arc<[Quaternion]> = Arc::from(generate_rotation_set(4, 1));
        let outcomes = fan_out(&rotations, 2, |index, _| {
            if index == 2 {
                panic!("bad augmentation");
            }
            Ok(index * 10)
        })
        .unwrap();

        assert_eq!(outcomes.len(), 4);
        for outcome in &outcomes {
            assert_eq!(outcome.rotation, rotations[outcome.index]);
        }
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &0);
        assert_eq!(outcomes[3].result.as_ref().unwrap(), &30);
        assert!(matches!(
            outcomes[2].result,
            Err(PipeError::JobFailed { index: 2, .. })
        ));
    }

    #[test]
    fn test_fan_out_runs_each_index_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let rotations: Arc<[Quaternion]> = Arc::from(generate_rotation_set(8, 1));
        let seen = Arc::clone(&counter);
        let outcomes = fan_out(&rotations, 3, move |index, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(index)
        })
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 8);
        let indices: Vec<usize> = outcomes.into_iter().map(|o| o.result.unwrap()).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_process_writes_paired_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let set = write_fixture(dir.path());
        let pipe = Pipe::new(small_config(), dir.path().join("out")).unwrap();

        let report = pipe.process(&set, 0).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.rotations.len(), 3);
        assert_eq!(report.rotations[0], Quaternion::identity());
        assert_eq!(report.outputs.len(), 3);
        assert_eq!(report.mask_outputs.len(), 3);

        for (source, mask) in report.outputs.iter().zip(&report.mask_outputs) {
            assert_eq!(source.rotation, mask.rotation);
            let layers = read_fits_layers(source.result.as_ref().unwrap()).unwrap();
            assert_eq!(layers.len(), 1);
            assert_eq!(layers[0].0, "CH0");
            assert_eq!(layers[0].1.dim(), (4, 12, 12));

            let mask_layers = read_fits_layers(mask.result.as_ref().unwrap()).unwrap();
            assert_eq!(mask_layers[0].0, MASK_LAYER);
            assert!(mask_layers[0].1.iter().all(|&v| v == 0.0 || v == 1.0));
        }
    }

    #[test]
    fn test_flatten_threeclass_and_previews() {
        let dir = tempfile::tempdir().unwrap();
        let set = write_fixture(dir.path());
        let config = PipeConfig {
            flatten: true,
            max_intensity: true,
            threeclass: true,
            jpeg_previews: true,
            autoback: true,
            ..small_config()
        };
        let out = dir.path().join("out");
        let pipe = Pipe::new(config, &out).unwrap();

        let report = pipe.process(&set, 0).unwrap();
        assert!(report.is_complete());
        assert!(out.join("cell_aug000.jpg").exists());

        let layers = read_fits_layers(out.join("cell_aug001.fits")).unwrap();
        assert_eq!(layers[0].1.dim(), (1, 12, 12));
        let mask = read_fits_layers(out.join("cell_mask_aug000.fits")).unwrap();
        assert!(mask[0].1.iter().any(|&v| v == 2.0));
    }

    #[test]
    fn test_missing_file_skips_image() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_fixture(dir.path());
        let config = PipeConfig {
            manifest_path: Some(dir.path().join("manifest.jsonl")),
            ..small_config()
        };
        let pipe = Pipe::new(config, dir.path().join("out")).unwrap();

        let report = pipe.run_batch(&[SourceSet::new(dir.path().join("missing.tif")), good]);
        assert_eq!(report.images.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(
            report.skipped[0].1,
            PipeError::Io(IoError::FileDoesNotExist(_))
        ));

        let rows = crate::manifest::read_rows(dir.path().join("manifest.jsonl")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outputs.len(), 3);
    }

    #[test]
    fn test_interz_samples_final_depth_during_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let set = write_fixture(dir.path());

        let run = |interz: bool| {
            let config = PipeConfig {
                interz,
                ..small_config()
            };
            let out = dir.path().join(format!("interz_{interz}"));
            let report = Pipe::new(config, &out).unwrap().process(&set, 0).unwrap();
            report
                .outputs
                .iter()
                .map(|o| read_fits_layers(o.result.as_ref().unwrap()).unwrap())
                .collect::<Vec<_>>()
        };

        let stepped = run(false);
        let interpolated = run(true);
        for layers in &interpolated {
            assert_eq!(layers[0].1.dim(), (4, 12, 12));
        }
        assert_ne!(stepped, interpolated);
    }

    #[test]
    fn test_failed_deconvolution_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let set = write_fixture(dir.path());
        let psf_path = dir.path().join("wide_psf.tif");
        write_tiff_stack_f32(&psf_path, &Array3::<f32>::ones((6, 30, 30)).view()).unwrap();

        let config = PipeConfig {
            deconv: true,
            psf_path: Some(psf_path),
            ..small_config()
        };
        let out = dir.path().join("out");
        let pipe = Pipe::new(config, &out).unwrap();

        let report = pipe.run_batch(&[set]);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(
            report.skipped[0].1,
            PipeError::Deconvolution(DeconvolutionError::PsfTooLarge { .. })
        ));
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let set = write_fixture(dir.path());
        let wrong = dir.path().join("wrong_mask.tif");
        write_tiff_stack(&wrong, &Array3::<u16>::zeros((10, 40, 40)).view()).unwrap();

        let pipe = Pipe::new(small_config(), dir.path().join("out")).unwrap();
        let result = pipe.process(&set.with_mask(wrong), 0);
        assert!(matches!(result, Err(PipeError::ShapeMismatch { .. })));
    }
}
