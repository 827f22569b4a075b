//! Training loop implementation for the AC-GAN
//!
//! Each batch runs a discriminator update on real images and on generated
//! foregrounds composited onto the batch's backgrounds, then a generator
//! update through the freshly stepped discriminator.

use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::path::PathBuf;
use tch::{nn, Tensor};
use tracing::{debug, info, warn};

use super::losses::{auxiliary_loss, classification_accuracy, FAKE_LABEL, REAL_LABEL};
use super::metrics::{BatchStats, EpochAccumulator, EpochSummary, TrainingMetrics};
use crate::data::{array_to_tensor, Batch, BatchSource};
use crate::error::{Error, Result};
use crate::model::{composite, unit_matte, FixedLatent, LatentEncoder, ACGAN};
use crate::utils::{save_checkpoint, save_image_grid, CheckpointPaths, GRID_COLUMNS};

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Learning rate of both optimizers
    pub lr: f64,
    /// Adam beta1
    pub beta1: f64,
    /// Write image snapshots every N batches of an epoch
    pub snapshot_every: usize,
    /// Directory for checkpoints, snapshots and metrics
    pub output_dir: PathBuf,
    /// Fail on NaN/Inf losses before any optimizer consumes them
    pub halt_on_non_finite: bool,
    pub progress_bar: bool,
    pub save_snapshots: bool,
    /// Rows of the fixed evaluation latent
    pub fixed_batch_size: usize,
    /// Epochs considered by the mode-collapse check
    pub collapse_window: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            lr: 2e-4,
            beta1: 0.5,
            snapshot_every: 100,
            output_dir: PathBuf::from("output"),
            halt_on_non_finite: true,
            progress_bar: true,
            save_snapshots: true,
            fixed_batch_size: 64,
            collapse_window: 10,
        }
    }
}

/// Mutable run state, seeded once
pub struct TrainerState {
    pub seed: u64,
    /// The single stream behind shuffles, flips and latent noise
    pub rng: ChaCha8Rng,
    /// Epoch in progress
    pub epoch: usize,
    /// Batches trained so far across epochs
    pub global_step: usize,
}

impl TrainerState {
    /// Seed both libtorch and the shared stream
    pub fn seeded(seed: u64) -> Self {
        tch::manual_seed(seed as i64);
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            epoch: 0,
            global_step: 0,
        }
    }
}

impl fmt::Debug for TrainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainerState")
            .field("seed", &self.seed)
            .field("epoch", &self.epoch)
            .field("global_step", &self.global_step)
            .finish()
    }
}

/// Outcome of a discriminator update
#[derive(Debug)]
pub struct DiscriminatorStep {
    /// Composite fed to the discriminator, still attached to the generator graph
    pub fake: Tensor,
    /// Condition labels of `fake`
    pub fake_labels: Tensor,
    /// Total optimised loss (real + fake)
    pub loss: f64,
    pub real_loss: f64,
    pub fake_loss: f64,
    pub d_x: f64,
    pub d_g_z1: f64,
    pub correct: i64,
    pub total: i64,
}

/// Outcome of a generator update
#[derive(Debug, Clone, Copy)]
pub struct GeneratorStep {
    pub loss: f64,
    pub d_g_z2: f64,
}

/// Progress line of one batch
#[derive(Debug, Clone, Copy)]
pub struct BatchReport {
    pub epoch: usize,
    pub epochs: usize,
    pub batch: usize,
    pub num_batches: usize,
    pub stats: BatchStats,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        write!(
            f,
            "[{}/{}][{}/{}] Loss_D: {:.4} Loss_G: {:.4} D(x): {:.4} D(G(z)): {:.4} / {:.4} Accuracy: {} / {} = {:.2}%",
            self.epoch,
            self.epochs,
            self.batch,
            self.num_batches,
            s.d_loss,
            s.g_loss,
            s.d_x,
            s.d_g_z1,
            s.d_g_z2,
            s.correct,
            s.total,
            s.accuracy() * 100.0
        )
    }
}

/// Everything one epoch produced
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub batches: Vec<BatchReport>,
    pub summary: EpochSummary,
    pub checkpoint: CheckpointPaths,
}

/// AC-GAN trainer
pub struct AdversarialTrainer {
    config: TrainerConfig,
    model: ACGAN,
    encoder: LatentEncoder,
    gen_opt: nn::Optimizer,
    disc_opt: nn::Optimizer,
    fixed: FixedLatent,
    /// Whether the fixed latent carries batch poses yet
    fixed_conditioned: bool,
    metrics: TrainingMetrics,
    state: TrainerState,
}

impl AdversarialTrainer {
    /// Create a new trainer
    ///
    /// Draws the fixed evaluation latent from `state.rng`.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the encoder and the model disagree on latent size or
    /// class count.
    pub fn new(model: ACGAN, encoder: LatentEncoder, config: TrainerConfig, mut state: TrainerState) -> Result<Self> {
        if encoder.latent_dim() as i64 != model.latent_dim() {
            return Err(Error::ConfigError(format!(
                "latent encoder emits {} dims but the generator takes {}",
                encoder.latent_dim(),
                model.latent_dim()
            )));
        }
        if encoder.spec().num_classes as i64 != model.num_classes() {
            return Err(Error::ConfigError(format!(
                "latent encoder has {} classes but the discriminator has {}",
                encoder.spec().num_classes,
                model.num_classes()
            )));
        }

        let gen_opt = model.gen_optimizer(config.lr, config.beta1)?;
        let disc_opt = model.disc_optimizer(config.lr, config.beta1)?;
        let fixed = encoder.fixed(&mut state.rng, config.fixed_batch_size.max(1))?;

        Ok(Self {
            config,
            model,
            encoder,
            gen_opt,
            disc_opt,
            fixed,
            fixed_conditioned: false,
            metrics: TrainingMetrics::new(),
            state,
        })
    }

    /// Continue from metrics restored with a checkpoint
    pub fn with_metrics(mut self, metrics: TrainingMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn model(&self) -> &ACGAN {
        &self.model
    }

    pub fn into_model(self) -> ACGAN {
        self.model
    }

    pub fn encoder(&self) -> &LatentEncoder {
        &self.encoder
    }

    pub fn fixed_latent(&self) -> &FixedLatent {
        &self.fixed
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// Get configuration
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Reject batches whose tensors do not match the model
    fn check_batch(&self, batch: &Batch) -> Result<()> {
        let b = batch.len() as i64;
        if b == 0 {
            return Err(Error::ShapeError("empty batch".to_string()));
        }
        let s = self.model.image_size();
        let expected = [b, self.model.channels(), s, s];
        if batch.real.size() != expected {
            return Err(Error::mismatch("real batch", &expected, &batch.real.size()));
        }
        if batch.real_classes.size() != [b] {
            return Err(Error::mismatch("real labels", &[b], &batch.real_classes.size()));
        }
        if let Some(matte) = &batch.matte {
            if matte.size() != [b, 1, s, s] {
                return Err(Error::mismatch("alpha matte", &[b, 1, s, s], &matte.size()));
            }
        }
        Ok(())
    }

    fn finite(&self, which: &'static str, loss: &Tensor, batch: usize) -> Result<f64> {
        let value = loss.double_value(&[]);
        if !value.is_finite() {
            if self.config.halt_on_non_finite {
                return Err(Error::NonFiniteLossError {
                    which,
                    value,
                    epoch: self.state.epoch,
                    batch,
                });
            }
            warn!(
                "Non-finite {} loss ({}) at epoch {}, batch {}",
                which, value, self.state.epoch, batch
            );
        }
        Ok(value)
    }

    /// Generate a conditioned foreground batch and blend it onto the
    /// batch backgrounds when the batch has mattes
    fn generate_fake(&mut self, batch: &Batch) -> Result<Tensor> {
        let poses = match self.encoder.spec().pose {
            Some(_) => batch.poses.as_deref(),
            None => None,
        };
        let noise = self
            .encoder
            .encode(&mut self.state.rng, &batch.condition_classes, poses)?;
        let generated = self
            .model
            .generator
            .forward_t(&array_to_tensor(&noise, self.model.device), true);

        match &batch.matte {
            Some(matte) => composite(&generated, &batch.real, &unit_matte(matte)),
            None => Ok(generated),
        }
    }

    /// Update the discriminator on one real batch and one generated batch
    pub fn discriminator_step(&mut self, batch: &Batch, batch_idx: usize) -> Result<DiscriminatorStep> {
        self.check_batch(batch)?;
        self.disc_opt.zero_grad();

        let real_out = self.model.discriminator.forward_t(&batch.real, true);
        let err_real = auxiliary_loss(
            &real_out.source_logits,
            &real_out.class_log_probs,
            REAL_LABEL,
            &batch.real_classes,
        );
        let d_x = real_out.mean_score();
        let (correct, total) = classification_accuracy(&real_out.class_log_probs, &batch.real_classes);

        let fake = self.generate_fake(batch)?;
        let fake_labels = batch.condition_tensor(self.model.device);
        let fake_out = self.model.discriminator.forward_t(&fake.detach(), true);
        let err_fake = auxiliary_loss(
            &fake_out.source_logits,
            &fake_out.class_log_probs,
            FAKE_LABEL,
            &fake_labels,
        );
        let d_g_z1 = fake_out.mean_score();

        let err_d = &err_real + &err_fake;
        let loss = self.finite("discriminator", &err_d, batch_idx)?;
        err_d.backward();
        self.disc_opt.step();

        Ok(DiscriminatorStep {
            fake,
            fake_labels,
            loss,
            real_loss: err_real.double_value(&[]),
            fake_loss: err_fake.double_value(&[]),
            d_x,
            d_g_z1,
            correct,
            total,
        })
    }

    /// Update the generator so the discriminator takes `step.fake` for real
    pub fn generator_step(&mut self, step: &DiscriminatorStep, batch_idx: usize) -> Result<GeneratorStep> {
        self.gen_opt.zero_grad();

        let out = self.model.discriminator.forward_t(&step.fake, true);
        let err_g = auxiliary_loss(&out.source_logits, &out.class_log_probs, REAL_LABEL, &step.fake_labels);
        let d_g_z2 = out.mean_score();

        let loss = self.finite("generator", &err_g, batch_idx)?;
        err_g.backward();
        self.gen_opt.step();

        Ok(GeneratorStep { loss, d_g_z2 })
    }

    /// Discriminator step followed by generator step
    pub fn train_batch(&mut self, batch: &Batch, batch_idx: usize) -> Result<BatchStats> {
        let d = self.discriminator_step(batch, batch_idx)?;
        let g = self.generator_step(&d, batch_idx)?;

        Ok(BatchStats {
            d_loss: d.loss,
            g_loss: g.loss,
            d_x: d.d_x,
            d_g_z1: d.d_g_z1,
            d_g_z2: g.d_g_z2,
            correct: d.correct,
            total: d.total,
        })
    }

    fn write_snapshots(&self, batch: &Batch) -> anyhow::Result<()> {
        let dir = &self.config.output_dir;
        save_image_grid(&batch.real, dir.join("real_samples.png"), GRID_COLUMNS)?;

        if let (Some(foreground), Some(matte)) = (&batch.synthetic, &batch.matte) {
            let reference = composite(foreground, &batch.real, &unit_matte(matte))?;
            save_image_grid(&reference, dir.join("reference_composite.png"), GRID_COLUMNS)?;
        }

        let noise = array_to_tensor(self.fixed.latent(), self.model.device);
        let fake = self.model.generate_from_noise(&noise);
        save_image_grid(
            &fake,
            dir.join(format!("fake_samples_epoch_{:03}.png", self.state.epoch)),
            GRID_COLUMNS,
        )?;
        debug!("Wrote snapshots for epoch {}", self.state.epoch);
        Ok(())
    }

    fn progress_bar(&self, num_batches: usize) -> ProgressBar {
        if !self.config.progress_bar {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(num_batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb
    }

    /// Train one epoch and checkpoint both networks at its end
    pub fn train_epoch(&mut self, source: &mut dyn BatchSource, epoch: usize) -> anyhow::Result<EpochReport> {
        self.state.epoch = epoch;
        let num_batches = source.num_batches();
        let pb = self.progress_bar(num_batches);

        let mut acc = EpochAccumulator::new();
        let mut reports = Vec::with_capacity(num_batches);

        let batches = source.epoch(&mut self.state.rng, self.model.device)?;
        for (i, batch) in batches.enumerate() {
            let batch = batch?;

            if !self.fixed_conditioned && self.encoder.spec().pose.is_some() {
                if let Some(poses) = batch.poses.as_deref() {
                    self.fixed
                        .refresh_condition(&self.encoder, &batch.condition_classes, Some(poses))?;
                    self.fixed_conditioned = true;
                }
            }

            let stats = self.train_batch(&batch, i)?;
            acc.push(&stats);
            self.state.global_step += 1;

            let report = BatchReport {
                epoch,
                epochs: self.config.epochs,
                batch: i,
                num_batches,
                stats,
            };
            pb.suspend(|| info!("{}", report));
            pb.set_message(format!("G: {:.4}, D: {:.4}", stats.g_loss, stats.d_loss));
            pb.inc(1);

            if self.config.save_snapshots && i % self.config.snapshot_every.max(1) == 0 {
                self.write_snapshots(&batch)?;
            }
            reports.push(report);
        }
        pb.finish_and_clear();

        if acc.batches() == 0 {
            anyhow::bail!("epoch {} produced no batches", epoch);
        }

        let summary = acc.summary();
        self.metrics.record_epoch(&summary);
        info!(
            "Epoch {}/{}: G_loss={:.4}, D_loss={:.4}, D(x)={:.4}, D(G(z))={:.4}, Accuracy={:.2}%",
            epoch,
            self.config.epochs,
            summary.gen_loss,
            summary.disc_loss,
            summary.d_x,
            summary.d_g_z,
            summary.accuracy * 100.0
        );

        // Check for mode collapse
        if self.metrics.check_mode_collapse(self.config.collapse_window) {
            warn!("Possible mode collapse detected! Consider adjusting learning rates.");
        }

        let checkpoint = save_checkpoint(&self.model, &self.metrics, epoch, &self.config.output_dir)?;

        Ok(EpochReport {
            epoch,
            batches: reports,
            summary,
            checkpoint,
        })
    }

    /// Train from `start_epoch` up to the configured epoch count
    ///
    /// # Returns
    ///
    /// One report per completed epoch
    pub fn train(&mut self, source: &mut dyn BatchSource, start_epoch: usize) -> anyhow::Result<Vec<EpochReport>> {
        if source.channels() != self.model.channels() {
            anyhow::bail!(
                "data has {} channels but the model was built for {}",
                source.channels(),
                self.model.channels()
            );
        }
        if source.num_classes() > self.encoder.spec().num_classes {
            anyhow::bail!(
                "data has {} classes but the model was built for {}",
                source.num_classes(),
                self.encoder.spec().num_classes
            );
        }
        if self.encoder.spec().pose.is_some() && !source.has_poses() {
            anyhow::bail!("pose conditioning is enabled but the data carries no pose annotations");
        }
        std::fs::create_dir_all(&self.config.output_dir)?;

        info!(
            "Starting training for {} epochs, {} samples in {} batches per epoch",
            self.config.epochs.saturating_sub(start_epoch),
            source.num_samples(),
            source.num_batches()
        );

        let mut reports = Vec::new();
        for epoch in start_epoch..self.config.epochs {
            reports.push(self.train_epoch(source, epoch)?);
        }

        if let Some(last) = reports.last() {
            info!(
                "Training complete. Final G_loss: {:.4}, D_loss: {:.4}",
                last.summary.gen_loss, last.summary.disc_loss
            );
        }
        Ok(reports)
    }
}
