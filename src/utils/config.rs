//! Configuration management
//!
//! Provides unified configuration for the whole AC-GAN pipeline. Every field
//! can be overridden from the command line.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::{LengthPolicy, LoaderConfig, Pairing};
use crate::model::{upsampling_layers, PoseBinning};

/// Training set to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Paired synthetic renders and real backgrounds
    Syn,
    Mnist,
    Cifar10,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfigFile,
}

/// Data-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub dataset: DatasetKind,
    /// Dataset root directory
    pub dataroot: String,
    /// Batch size
    pub batch_size: usize,
    /// Height and width images are resized to
    pub image_size: i64,
    /// Decoding threads
    pub workers: usize,
    /// Batches buffered ahead of training
    pub prefetch: usize,
    pub shuffle: bool,
    /// Random horizontal flips of each triplet
    pub hflip: bool,
    pub length_policy: LengthPolicy,
    pub pairing: Pairing,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Syn,
            dataroot: "data".to_string(),
            batch_size: 64,
            image_size: 64,
            workers: 2,
            prefetch: 2,
            shuffle: true,
            hflip: false,
            length_policy: LengthPolicy::Wrap,
            pairing: Pairing::Index,
        }
    }
}

impl DataConfig {
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            hflip: self.hflip,
            workers: self.workers,
            prefetch: self.prefetch,
        }
    }
}

/// Model-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Latent dimension size (`nz`), condition block included
    pub latent_dim: i64,
    /// Base filters for generator (`ngf`)
    pub ngf: i64,
    /// Base filters for discriminator (`ndf`)
    pub ndf: i64,
    /// Dropout rate for discriminator
    pub dropout: f64,
    /// Condition on binned pose as well as class (`syn` only)
    pub pose_conditioning: bool,
    pub pose_binning: PoseBinning,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            ngf: 64,
            ndf: 64,
            dropout: 0.5,
            pose_conditioning: true,
            pose_binning: PoseBinning::default(),
        }
    }
}

/// Training-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfigFile {
    /// Number of epochs (`niter`)
    pub epochs: usize,
    /// Learning rate of both optimizers
    pub lr: f64,
    /// Adam beta1
    pub beta1: f64,
    /// Write image snapshots every N batches
    pub snapshot_every: usize,
    /// Output directory for checkpoints, snapshots and metrics
    pub outf: String,
    /// Device: "cpu" or "cuda"
    pub device: String,
    /// Seed of the run; drawn at random when absent
    pub seed: Option<u64>,
    /// Abort on NaN/Inf losses instead of logging them
    pub halt_on_non_finite: bool,
    pub progress_bar: bool,
    /// Generator parameters to start from
    pub net_g: Option<String>,
    /// Discriminator parameters to start from
    pub net_d: Option<String>,
}

impl Default for TrainingConfigFile {
    fn default() -> Self {
        Self {
            epochs: 25,
            lr: 2e-4,
            beta1: 0.5,
            snapshot_every: 100,
            outf: "output".to_string(),
            device: "cpu".to_string(),
            seed: None,
            halt_on_non_finite: true,
            progress_bar: true,
            net_g: None,
            net_d: None,
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `.toml` or JSON depending on the extension
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if is_toml(path) {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save as `.toml` or JSON depending on the extension
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if is_toml(path) {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Image channels of the configured dataset
    pub fn channels(&self) -> i64 {
        match self.data.dataset {
            DatasetKind::Mnist => 1,
            DatasetKind::Syn | DatasetKind::Cifar10 => 3,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        upsampling_layers(self.data.image_size)?;
        if self.model.latent_dim <= 0 {
            anyhow::bail!("Latent dimension must be > 0");
        }
        if self.model.ngf <= 0 || self.model.ndf <= 0 {
            anyhow::bail!("Filter widths must be > 0 (ngf={}, ndf={})", self.model.ngf, self.model.ndf);
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            anyhow::bail!("Dropout must be in [0, 1), got {}", self.model.dropout);
        }
        if self.training.epochs == 0 {
            anyhow::bail!("Number of epochs must be > 0");
        }
        if self.training.lr <= 0.0 {
            anyhow::bail!("Learning rate must be > 0");
        }
        if !(0.0..1.0).contains(&self.training.beta1) {
            anyhow::bail!("beta1 must be in [0, 1), got {}", self.training.beta1);
        }
        if self.training.snapshot_every == 0 {
            anyhow::bail!("Snapshot interval must be > 0");
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case("toml"))
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if path.exists() {
        Config::from_file(path)
    } else {
        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }
}
