//! Checkpoint save/load utilities
//!
//! Each completed epoch `e` leaves `netG_epoch_{e}.pt`, `netD_epoch_{e}.pt`
//! and `checkpoint_epoch_{e}.json` in the output directory, next to a
//! `training_metrics.csv` covering every epoch so far.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::ACGAN;
use crate::training::TrainingMetrics;

/// Metrics file kept next to the checkpoints
pub const METRICS_FILE: &str = "training_metrics.csv";

const META_PREFIX: &str = "checkpoint_epoch_";

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Epoch the checkpoint closes
    pub epoch: usize,
    /// Generator loss at checkpoint
    pub gen_loss: f64,
    /// Discriminator loss at checkpoint
    pub disc_loss: f64,
    /// Timestamp of checkpoint
    pub timestamp: String,
    /// Model configuration (as JSON)
    pub config: String,
}

/// Files making up the checkpoint of one epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub generator: PathBuf,
    pub discriminator: PathBuf,
    pub meta: PathBuf,
}

impl CheckpointPaths {
    pub fn for_epoch(dir: impl AsRef<Path>, epoch: usize) -> Self {
        let dir = dir.as_ref();
        Self {
            generator: dir.join(format!("netG_epoch_{epoch}.pt")),
            discriminator: dir.join(format!("netD_epoch_{epoch}.pt")),
            meta: dir.join(format!("{META_PREFIX}{epoch}.json")),
        }
    }
}

/// Save both networks, the metadata and the metrics history
///
/// # Arguments
///
/// * `model` - AC-GAN model to save
/// * `metrics` - Training metrics
/// * `epoch` - Epoch that just finished
/// * `dir` - Directory to save checkpoint
///
/// # Returns
///
/// Paths of the written files
pub fn save_checkpoint(
    model: &ACGAN,
    metrics: &TrainingMetrics,
    epoch: usize,
    dir: impl AsRef<Path>,
) -> anyhow::Result<CheckpointPaths> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let paths = CheckpointPaths::for_epoch(dir, epoch);
    model.save(&paths.generator, &paths.discriminator)?;

    let meta = CheckpointMeta {
        epoch,
        gen_loss: metrics.latest_gen_loss().unwrap_or(0.0),
        disc_loss: metrics.latest_disc_loss().unwrap_or(0.0),
        timestamp: chrono::Utc::now().to_rfc3339(),
        config: serde_json::json!({
            "latent_dim": model.latent_dim(),
            "image_size": model.image_size(),
            "channels": model.channels(),
            "num_classes": model.num_classes(),
            "ngf": model.generator.config().base_filters,
            "ndf": model.discriminator.config().base_filters,
        })
        .to_string(),
    };
    std::fs::write(&paths.meta, serde_json::to_string_pretty(&meta)?)?;

    metrics.save_csv(dir.join(METRICS_FILE))?;

    tracing::info!("Saved checkpoint for epoch {} to {}", epoch, dir.display());
    Ok(paths)
}

/// Load checkpoint metadata
pub fn load_checkpoint_meta(path: impl AsRef<Path>) -> anyhow::Result<CheckpointMeta> {
    let content = std::fs::read_to_string(path)?;
    let meta: CheckpointMeta = serde_json::from_str(&content)?;
    Ok(meta)
}

/// Load the checkpoint of `epoch` from `dir`
///
/// # Returns
///
/// Tuple of (metadata, metrics up to that epoch)
pub fn load_checkpoint(
    model: &mut ACGAN,
    dir: impl AsRef<Path>,
    epoch: usize,
) -> anyhow::Result<(CheckpointMeta, TrainingMetrics)> {
    let dir = dir.as_ref();
    let paths = CheckpointPaths::for_epoch(dir, epoch);
    model.load(&paths.generator, &paths.discriminator)?;

    let meta = load_checkpoint_meta(&paths.meta)?;

    let metrics_path = dir.join(METRICS_FILE);
    let mut metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(&metrics_path)?
    } else {
        TrainingMetrics::new()
    };
    metrics.truncate(epoch + 1);

    tracing::info!("Loaded checkpoint from {} (epoch {})", dir.display(), meta.epoch);
    Ok((meta, metrics))
}

fn meta_epoch(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix(META_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Epoch of the latest complete checkpoint in a directory
///
/// A checkpoint counts only when its metadata and both parameter files exist.
pub fn find_latest_checkpoint(dir: impl AsRef<Path>) -> Option<usize> {
    let dir = dir.as_ref();
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| meta_epoch(&e.path()))
        .filter(|&epoch| {
            let paths = CheckpointPaths::for_epoch(dir, epoch);
            paths.generator.exists() && paths.discriminator.exists()
        })
        .max()
}

/// List all checkpoints in a directory, oldest first
pub fn list_checkpoints(dir: impl AsRef<Path>) -> Vec<(usize, CheckpointMeta)> {
    let mut found: Vec<(usize, CheckpointMeta)> = std::fs::read_dir(dir.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            let epoch = meta_epoch(&path)?;
            load_checkpoint_meta(&path).ok().map(|meta| (epoch, meta))
        })
        .collect();
    found.sort_by_key(|(epoch, _)| *epoch);
    found
}
