//! Training module for the AC-GAN
//!
//! This module provides:
//! - The adversarial trainer and its per-batch update protocol
//! - Source (BCE) and class (NLL) loss functions
//! - Training configuration, state and metrics

mod losses;
mod metrics;
mod trainer;

pub use losses::{auxiliary_loss, class_loss, classification_accuracy, source_loss, FAKE_LABEL, REAL_LABEL};
pub use metrics::{BatchStats, EpochAccumulator, EpochSummary, TrainingMetrics};
pub use trainer::{
    AdversarialTrainer, BatchReport, DiscriminatorStep, EpochReport, GeneratorStep, TrainerConfig, TrainerState,
};
