//! Data module for indexing, decoding and batching training images
//!
//! This module provides:
//! - Pose-annotated filename parsing
//! - Paired synthetic/real sample indexing over a shared class taxonomy
//! - The paired dataset and its shuffling, prefetching DataLoader
//! - In-memory labeled sets (`mnist`, `cifar10`)

mod batch;
mod dataset;
mod index;
mod labeled;
mod loader;
mod pose;
mod transform;

pub use batch::{array_to_tensor, batches_per_epoch, labels_to_tensor, Batch, BatchSource};
pub use dataset::{split_alpha, ImageFileLoader, LengthPolicy, PairedDataset, PairedSample, Pairing, SampleLoader};
pub use index::{
    has_allowed_extension, ClassTaxonomy, PairedSampleIndex, RealSample, SyntheticSample, IMG_EXTENSIONS, REAL_DIR,
    SYNTHETIC_DIR,
};
pub use labeled::{LabeledImageSet, LabeledKind};
pub use loader::{EpochBatches, LoaderConfig, PairedBatch, PairedDataLoader, PrefetchBatches};
pub use pose::{parse_pose_annotation, PoseAnnotation};
pub use transform::ImageTransform;
