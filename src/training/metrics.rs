//! Training metrics for monitoring GAN progress
//!
//! Provides per-batch accumulation and per-epoch history with CSV export.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of the metrics CSV
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct MetricsRow {
    epoch: usize,
    gen_loss: f64,
    disc_loss: f64,
    d_x: f64,
    d_g_z: f64,
    accuracy: f64,
}

/// Statistics of a single batch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    /// Total optimised discriminator loss
    pub d_loss: f64,
    pub g_loss: f64,
    /// Mean D output on real images
    pub d_x: f64,
    /// Mean D output on the composite before the discriminator step
    pub d_g_z1: f64,
    /// Mean D output on the composite during the generator step
    pub d_g_z2: f64,
    /// Correct class predictions on the real batch
    pub correct: i64,
    pub total: i64,
}

impl BatchStats {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Running means over the batches of one epoch
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    batches: usize,
    d_loss: f64,
    g_loss: f64,
    d_x: f64,
    d_g_z: f64,
    correct: i64,
    total: i64,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stats: &BatchStats) {
        self.batches += 1;
        self.d_loss += stats.d_loss;
        self.g_loss += stats.g_loss;
        self.d_x += stats.d_x;
        self.d_g_z += stats.d_g_z2;
        self.correct += stats.correct;
        self.total += stats.total;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Means as an epoch summary
    pub fn summary(&self) -> EpochSummary {
        let n = self.batches.max(1) as f64;
        EpochSummary {
            gen_loss: self.g_loss / n,
            disc_loss: self.d_loss / n,
            d_x: self.d_x / n,
            d_g_z: self.d_g_z / n,
            accuracy: if self.total == 0 {
                0.0
            } else {
                self.correct as f64 / self.total as f64
            },
        }
    }
}

/// Averages of one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochSummary {
    pub gen_loss: f64,
    pub disc_loss: f64,
    pub d_x: f64,
    pub d_g_z: f64,
    pub accuracy: f64,
}

/// Metrics collected during training
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Generator losses per epoch
    pub gen_losses: Vec<f64>,
    /// Discriminator losses per epoch
    pub disc_losses: Vec<f64>,
    /// Mean D(x) per epoch
    pub d_x: Vec<f64>,
    /// Mean D(G(z)) per epoch
    pub d_g_z: Vec<f64>,
    /// Class accuracy on real samples per epoch
    pub accuracy: Vec<f64>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record epoch metrics
    pub fn record_epoch(&mut self, summary: &EpochSummary) {
        self.gen_losses.push(summary.gen_loss);
        self.disc_losses.push(summary.disc_loss);
        self.d_x.push(summary.d_x);
        self.d_g_z.push(summary.d_g_z);
        self.accuracy.push(summary.accuracy);
    }

    /// Drop every epoch after the first `epochs`
    pub fn truncate(&mut self, epochs: usize) {
        self.gen_losses.truncate(epochs);
        self.disc_losses.truncate(epochs);
        self.d_x.truncate(epochs);
        self.d_g_z.truncate(epochs);
        self.accuracy.truncate(epochs);
    }

    /// Get number of recorded epochs
    pub fn num_epochs(&self) -> usize {
        self.gen_losses.len()
    }

    /// Get latest generator loss
    pub fn latest_gen_loss(&self) -> Option<f64> {
        self.gen_losses.last().copied()
    }

    /// Get latest discriminator loss
    pub fn latest_disc_loss(&self) -> Option<f64> {
        self.disc_losses.last().copied()
    }

    /// Calculate moving average of generator loss
    pub fn gen_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.gen_losses, window)
    }

    /// Calculate moving average of discriminator loss
    pub fn disc_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.disc_losses, window)
    }

    /// Check if training appears to have collapsed
    ///
    /// Mode collapse indicators:
    /// - Discriminator loss very low (can easily distinguish)
    /// - Generator loss very high (can't fool discriminator)
    pub fn check_mode_collapse(&self, window: usize) -> bool {
        if self.num_epochs() < window {
            return false;
        }

        let disc_ma = self.disc_loss_ma(window);
        let gen_ma = self.gen_loss_ma(window);

        // Heuristic thresholds for mode collapse detection
        disc_ma < 0.1 && gen_ma > 5.0
    }

    /// Save metrics to CSV file
    pub fn save_csv(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        for epoch in 0..self.num_epochs() {
            writer.serialize(MetricsRow {
                epoch,
                gen_loss: self.gen_losses[epoch],
                disc_loss: self.disc_losses[epoch],
                d_x: self.d_x[epoch],
                d_g_z: self.d_g_z[epoch],
                accuracy: self.accuracy[epoch],
            })?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load metrics from CSV file
    ///
    /// Rows missing a column or holding a non-numeric value are an error
    /// naming the file.
    pub fn load_csv(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.deserialize() {
            let row: MetricsRow =
                result.map_err(|e| anyhow::anyhow!("invalid metrics file {}: {}", path.display(), e))?;
            metrics.gen_losses.push(row.gen_loss);
            metrics.disc_losses.push(row.disc_loss);
            metrics.d_x.push(row.d_x);
            metrics.d_g_z.push(row.d_g_z);
            metrics.accuracy.push(row.accuracy);
        }

        Ok(metrics)
    }
}

/// Calculate moving average of last `window` values
fn moving_average(values: &[f64], window: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = window.min(values.len());
    let sum: f64 = values.iter().rev().take(n).sum();
    sum / n as f64
}
