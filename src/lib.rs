//! # AC-GAN for Compositing Synthetic Renders
//!
//! This crate trains an Auxiliary Classifier GAN whose generator is
//! conditioned on object class and viewpoint. Generated foregrounds are alpha
//! composited onto real photographs before the discriminator judges them.
//!
//! ## Modules
//!
//! - `data`: Pose-annotated sample indexing, paired dataset and batch loading
//! - `model`: Generator, auxiliary discriminator, latent encoder, compositor
//! - `training`: Adversarial training loop, loss functions and metrics
//! - `utils`: Configuration, checkpoints and image snapshots

pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{
    parse_pose_annotation, Batch, BatchSource, ImageTransform, LabeledImageSet, PairedDataLoader, PairedDataset,
    PairedSampleIndex, PoseAnnotation,
};
pub use error::{Error, Result};
pub use model::{composite, ConditionSpec, Discriminator, Generator, LatentEncoder, PoseBinning, ACGAN};
pub use training::{AdversarialTrainer, TrainerConfig, TrainerState, TrainingMetrics};
pub use utils::{load_checkpoint, save_checkpoint, Config};
