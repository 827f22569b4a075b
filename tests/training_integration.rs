//! Integration tests for the AC-GAN training pipeline

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::path::Path;
use tch::Device;
use tempfile::TempDir;

use rust_acgan_syn::data::{
    ImageTransform, LengthPolicy, LoaderConfig, PairedDataLoader, PairedDataset, PairedSampleIndex, Pairing,
    PoseAnnotation, IMG_EXTENSIONS,
};
use rust_acgan_syn::model::{parameter_snapshot, parameters_changed, ConditionSpec, LatentEncoder, PoseBinning, ACGAN};
use rust_acgan_syn::training::{AdversarialTrainer, TrainerConfig, TrainerState, TrainingMetrics};
use rust_acgan_syn::utils::{find_latest_checkpoint, list_checkpoints, load_checkpoint, METRICS_FILE};
use rust_acgan_syn::Error;

const CLASSES: [&str; 4] = ["aeroplane", "bicycle", "boat", "car"];
const PER_CLASS: usize = 2;

/// `root/syn/<class>/<pose file>` renders with a round matte and
/// `root/real/<class>/*.png` backgrounds
fn toy_dataset() -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (c, class) in CLASSES.iter().enumerate() {
        let syn = tmp.path().join("syn").join(class);
        let real = tmp.path().join("real").join(class);
        std::fs::create_dir_all(&syn).unwrap();
        std::fs::create_dir_all(&real).unwrap();

        for i in 0..PER_CLASS {
            let pose = PoseAnnotation::new(90 * i as i32, -15 + 30 * i as i32, 0, 3);
            let render = RgbaImage::from_fn(12, 12, |x, y| {
                let inside = (x as i32 - 6).pow(2) + (y as i32 - 6).pow(2) < 16;
                Rgba([40 * c as u8, 200, 30 * i as u8, if inside { 255 } else { 0 }])
            });
            render
                .save(syn.join(pose.file_name(&format!("{c:08x}"), &format!("inst{i}"), "png")))
                .unwrap();

            RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8 * 20, y as u8 * 20, 60 * c as u8]))
                .save(real.join(format!("photo_{i}.png")))
                .unwrap();
        }
    }
    tmp
}

fn loader(root: &Path, workers: usize) -> PairedDataLoader {
    let index = PairedSampleIndex::build(root, &IMG_EXTENSIONS).unwrap();
    let dataset =
        PairedDataset::from_index(index, ImageTransform::symmetric(8), LengthPolicy::Wrap, Pairing::Index).unwrap();
    PairedDataLoader::new(
        dataset,
        LoaderConfig {
            batch_size: 4,
            shuffle: true,
            hflip: true,
            workers,
            prefetch: 2,
        },
    )
    .unwrap()
}

fn model() -> ACGAN {
    ACGAN::with_defaults(8, 3, CLASSES.len() as i64, 40, 8, 8, 0.0, Device::Cpu).unwrap()
}

fn trainer(out: &Path, epochs: usize) -> AdversarialTrainer {
    trainer_with(model(), out, epochs)
}

fn trainer_with(model: ACGAN, out: &Path, epochs: usize) -> AdversarialTrainer {
    let state = TrainerState::seeded(1234);
    let encoder = LatentEncoder::new(40, ConditionSpec::with_pose(CLASSES.len(), PoseBinning::default())).unwrap();
    let config = TrainerConfig {
        epochs,
        output_dir: out.to_path_buf(),
        progress_bar: false,
        fixed_batch_size: 8,
        ..Default::default()
    };
    AdversarialTrainer::new(model, encoder, config, state).unwrap()
}

/// Test one epoch end to end on pose-annotated renders and real photos
#[test]
fn test_one_epoch_end_to_end() {
    let data = toy_dataset();
    let out = TempDir::new().unwrap();

    let mut source = loader(data.path(), 2);
    assert_eq!(source.num_batches(), 2);

    let mut trainer = trainer(out.path(), 1);
    let reports = trainer.train(&mut source, 0).unwrap();

    assert_eq!(reports.len(), 1);
    let epoch = &reports[0];
    assert_eq!(epoch.batches.len(), 2);
    for (i, report) in epoch.batches.iter().enumerate() {
        assert_eq!(report.batch, i);
        assert_eq!(report.stats.total, 4);
        assert!(report.stats.d_loss.is_finite() && report.stats.g_loss.is_finite());
        assert!(report.to_string().starts_with(&format!("[0/1][{i}/2] Loss_D: ")));
    }

    assert!(out.path().join("netG_epoch_0.pt").exists());
    assert!(out.path().join("netD_epoch_0.pt").exists());
    assert!(!out.path().join("netG_epoch_1.pt").exists());
    assert!(out.path().join(METRICS_FILE).exists());
    assert!(out.path().join("real_samples.png").exists());
    assert!(out.path().join("reference_composite.png").exists());
    assert!(out.path().join("fake_samples_epoch_000.png").exists());
    assert_eq!(find_latest_checkpoint(out.path()), Some(0));
}

/// Test inline loading and resuming from the last checkpoint
#[test]
fn test_resume_continues_after_last_epoch() {
    let data = toy_dataset();
    let out = TempDir::new().unwrap();

    let mut source = loader(data.path(), 0);
    let mut first = trainer(out.path(), 1);
    first.train(&mut source, 0).unwrap();
    let saved = parameter_snapshot(&first.model().gen_vs);
    drop(first);

    let last = find_latest_checkpoint(out.path()).unwrap();
    assert_eq!(last, 0);

    let mut restored = model();
    assert!(parameters_changed(&saved, &restored.gen_vs));
    let (meta, metrics) = load_checkpoint(&mut restored, out.path(), last).unwrap();
    assert_eq!(meta.epoch, 0);
    assert_eq!(metrics.num_epochs(), 1);
    assert!(!parameters_changed(&saved, &restored.gen_vs));

    let mut resumed = trainer_with(restored, out.path(), 2).with_metrics(metrics);
    let reports = resumed.train(&mut source, last + 1).unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].epoch, 1);
    assert_eq!(resumed.metrics().num_epochs(), 2);

    let on_disk = TrainingMetrics::load_csv(out.path().join(METRICS_FILE)).unwrap();
    assert_eq!(on_disk.num_epochs(), 2);

    let epochs: Vec<usize> = list_checkpoints(out.path()).into_iter().map(|(e, _)| e).collect();
    assert_eq!(epochs, vec![0, 1]);
}

/// Test dataset construction errors surface before training
#[test]
fn test_empty_synthetic_root_is_rejected() {
    let data = toy_dataset();
    for class in CLASSES {
        std::fs::remove_dir_all(data.path().join("syn").join(class)).unwrap();
    }

    let err = PairedSampleIndex::build(data.path(), &IMG_EXTENSIONS).unwrap_err();
    assert!(matches!(err, Error::EmptyDatasetError { .. }));
}
