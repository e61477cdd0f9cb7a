//! End-to-end runs of the preparation pipe on synthetic stacks written to disk

use ndarray::Array3;
use shared::io::{read_fits_layers, write_tiff_stack, write_tiff_stack_f32};
use shared::test_util::{cell_stack, ellipsoid_mask, interleave_channels};
use stackprep::manifest::read_rows;
use stackprep::{Pipe, PipeConfig, RoiStrategy, SourceSet};
use std::fs;
use std::path::Path;

/// Write a two-channel interleaved stack with a labelled cell and its mask
fn write_two_channel_cell(
    dir: &Path,
    name: &str,
    size: (usize, usize, usize),
    centre: (f64, f64, f64),
    radii: (f64, f64, f64),
) -> SourceSet {
    let ch0 = cell_stack(size, centre, radii, 100.0, 900.0, 1);
    let ch1 = cell_stack(size, centre, radii, 50.0, 300.0, 2);
    let stack = interleave_channels(&[ch0, ch1]);
    let mask = ellipsoid_mask(size, centre, radii, 1);

    let raw = dir.join(format!("{name}.tif"));
    let mask_path = dir.join(format!("{name}_mask.tif"));
    write_tiff_stack(&raw, &stack.view()).unwrap();
    write_tiff_stack(&mask_path, &mask.view()).unwrap();
    SourceSet::new(raw).with_mask(mask_path)
}

/// Mean of `values` where `mask` is (or is not) set
fn masked_means(values: &Array3<f32>, mask: &Array3<f32>) -> (f32, f32) {
    let (mut inside, mut n_in, mut outside, mut n_out) = (0.0, 0, 0.0, 0);
    for (&v, &m) in values.iter().zip(mask.iter()) {
        if m > 0.0 {
            inside += v;
            n_in += 1;
        } else {
            outside += v;
            n_out += 1;
        }
    }
    (inside / n_in.max(1) as f32, outside / n_out.max(1) as f32)
}

#[test]
fn test_two_channel_stack_produces_paired_augmentations() {
    let dir = tempfile::tempdir().unwrap();
    let set = write_two_channel_cell(
        dir.path(),
        "cell01",
        (640, 300, 51),
        (320.0, 150.0, 25.0),
        (30.0, 30.0, 8.0),
    );
    let out = dir.path().join("augmented");
    let manifest = dir.path().join("manifest.jsonl");

    let config = PipeConfig {
        num_augs: 3,
        roi_xy: 128,
        roi_depth: 25,
        channels: 2,
        roi_strategy: RoiStrategy::Centered,
        seed: 42,
        manifest_path: Some(manifest.clone()),
        ..Default::default()
    };
    let pipe = Pipe::new(config, &out).unwrap();
    let report = pipe.run_batch(&[set]);

    assert!(report.skipped.is_empty());
    assert_eq!(report.images.len(), 1);
    let image = &report.images[0];
    assert!(image.is_complete());
    assert_eq!(image.background, vec![0.0, 0.0]);

    let fits_files = fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "fits"))
        .count();
    assert_eq!(fits_files, 6);
    assert_eq!(image.outputs.len(), 3);
    assert_eq!(image.mask_outputs.len(), 3);

    for (i, (source, mask)) in image.outputs.iter().zip(&image.mask_outputs).enumerate() {
        assert_eq!(source.index, i);
        assert_eq!(mask.index, i);
        assert_eq!(source.rotation, image.rotations[i]);
        assert_eq!(mask.rotation, image.rotations[i]);

        let layers = read_fits_layers(source.result.as_ref().unwrap()).unwrap();
        let names: Vec<&str> = layers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["CH0", "CH1"]);
        for (_, layer) in &layers {
            assert_eq!(layer.dim(), (16, 64, 64));
        }

        // The cell must land under the mask when both used rotation i
        let mask_layers = read_fits_layers(mask.result.as_ref().unwrap()).unwrap();
        let mask_volume = &mask_layers[0].1;
        assert!(mask_volume.iter().any(|&v| v > 0.0));
        let (inside, outside) = masked_means(&layers[0].1, mask_volume);
        assert!(
            inside > 2.0 * outside,
            "augmentation {i}: inside {inside} outside {outside}"
        );
    }

    let rows = read_rows(&manifest).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].rotations, image.rotations);
    assert_eq!(
        rows[0].outputs,
        ["cell01_aug000.fits", "cell01_aug001.fits", "cell01_aug002.fits"]
    );
    assert_eq!(rows[0].roi, image.roi);
}

#[test]
fn test_output_independent_of_worker_count() {
    let dir = tempfile::tempdir().unwrap();
    let set = write_two_channel_cell(
        dir.path(),
        "small",
        (64, 64, 12),
        (32.0, 32.0, 6.0),
        (8.0, 8.0, 3.0),
    );

    let run = |workers: usize| {
        let config = PipeConfig {
            num_augs: 4,
            roi_xy: 32,
            roi_depth: 8,
            channels: 2,
            final_width: 16,
            final_height: 16,
            final_depth: 6,
            subpixel: true,
            workers: Some(workers),
            seed: 5,
            ..Default::default()
        };
        let out = dir.path().join(format!("workers{workers}"));
        let report = Pipe::new(config, &out).unwrap().process(&set, 0).unwrap();
        report
            .outputs
            .iter()
            .map(|o| read_fits_layers(o.result.as_ref().unwrap()).unwrap())
            .collect::<Vec<_>>()
    };

    assert_eq!(run(1), run(4));
}

#[test]
fn test_landmarks_place_roi_and_bottom_pins_it() {
    let dir = tempfile::tempdir().unwrap();
    let stack = cell_stack((64, 64, 10), (40.0, 40.0, 5.0), (5.0, 5.0, 2.0), 100.0, 900.0, 3);
    let raw = dir.path().join("landmarked.tif");
    write_tiff_stack(&raw, &stack.view()).unwrap();
    let coords = dir.path().join("landmarked.txt");
    fs::write(&coords, "# x y z\n18 28 4\n22 32 6\n").unwrap();
    let set = SourceSet::new(&raw).with_coords(&coords);

    let config = PipeConfig {
        roi_xy: 24,
        roi_depth: 6,
        final_width: 8,
        final_height: 8,
        final_depth: 4,
        ..Default::default()
    };
    let pipe = Pipe::new(config.clone(), dir.path().join("out")).unwrap();
    let roi = pipe.process(&set, 0).unwrap().roi;
    assert_eq!((roi.x, roi.y, roi.z), (8, 18, 2));

    let pinned = PipeConfig {
        bottom: true,
        ..config
    };
    let pipe = Pipe::new(pinned, dir.path().join("out_bottom")).unwrap();
    let roi = pipe.process(&set, 0).unwrap().roi;
    assert_eq!((roi.x, roi.y, roi.z), (8, 18, 4));

    let expected: f64 = stack
        .slice(ndarray::s![4..10, 18..42, 8..32])
        .iter()
        .map(|&v| v as f64)
        .sum();
    assert_eq!(roi.sum, expected);
}

#[test]
fn test_deconvolution_with_odd_roi_depth() {
    let dir = tempfile::tempdir().unwrap();
    let stack = cell_stack((48, 48, 9), (24.0, 24.0, 4.0), (6.0, 6.0, 2.0), 10.0, 500.0, 4);
    let raw = dir.path().join("blurred.tif");
    write_tiff_stack(&raw, &stack.view()).unwrap();

    let mut psf = Array3::<f32>::zeros((3, 3, 3));
    psf[[1, 1, 1]] = 1.0;
    let psf_path = dir.path().join("psf.tif");
    write_tiff_stack_f32(&psf_path, &psf.view()).unwrap();

    let config = PipeConfig {
        roi_xy: 24,
        roi_depth: 5,
        final_width: 12,
        final_height: 12,
        final_depth: 5,
        deconv: true,
        deconv_rounds: 3,
        psf_path: Some(psf_path),
        roi_strategy: RoiStrategy::Exhaustive,
        ..Default::default()
    };
    let pipe = Pipe::new(config, dir.path().join("out")).unwrap();
    let report = pipe.process(&SourceSet::new(&raw), 0).unwrap();
    assert!(report.is_complete());

    let layers = read_fits_layers(report.outputs[0].result.as_ref().unwrap()).unwrap();
    let volume = &layers[0].1;
    assert_eq!(volume.dim(), (5, 12, 12));
    assert!(volume.iter().all(|v| v.is_finite()));
}

#[test]
fn test_deconvolution_requires_psf_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipeConfig {
        deconv: true,
        psf_path: Some(dir.path().join("missing_psf.tif")),
        ..Default::default()
    };
    assert!(Pipe::new(config, dir.path().join("out")).is_err());
}
