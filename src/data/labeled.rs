//! In-memory labeled image sets (`mnist`, `cifar10`)
//!
//! Images are kept at their stored resolution in [0, 1] and resized and
//! normalized per batch, so the whole set never exists at training size.

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::{Device, Kind, Tensor};
use tracing::info;

use super::batch::{batches_per_epoch, Batch, BatchSource};
use crate::error::{Error, Result};

/// Which standard set to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabeledKind {
    Mnist,
    Cifar10,
}

impl LabeledKind {
    pub fn channels(&self) -> i64 {
        match self {
            LabeledKind::Mnist => 1,
            LabeledKind::Cifar10 => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LabeledKind::Mnist => "mnist",
            LabeledKind::Cifar10 => "cifar10",
        }
    }
}

/// Labeled training images served as class-conditioned batches
#[derive(Debug)]
pub struct LabeledImageSet {
    kind: LabeledKind,
    /// `[N, C, H, W]` in [0, 1]
    images: Tensor,
    /// int64 `[N]`
    labels: Tensor,
    num_classes: usize,
    image_size: i64,
    batch_size: usize,
    shuffle: bool,
}

impl LabeledImageSet {
    /// Load the training split of `kind` from `root`
    pub fn load(kind: LabeledKind, root: impl AsRef<Path>, image_size: i64, batch_size: usize) -> Result<Self> {
        let root = root.as_ref();
        let unreadable = |e: &dyn std::fmt::Display| {
            Error::ConfigError(format!("cannot read {} from {}: {e}", kind.name(), root.display()))
        };
        let dataset = match kind {
            LabeledKind::Mnist => tch::vision::mnist::load_dir(root).map_err(|e| unreadable(&e))?,
            LabeledKind::Cifar10 => tch::vision::cifar::load_dir(root).map_err(|e| unreadable(&e))?,
        };

        let images = match kind {
            LabeledKind::Mnist => dataset.train_images.view([-1, 1, 28, 28]),
            LabeledKind::Cifar10 => dataset.train_images,
        };
        info!(
            "Loaded {} {} training images ({} classes)",
            images.size()[0],
            kind.name(),
            dataset.labels
        );

        Self::from_tensors(kind, images, dataset.train_labels, dataset.labels as usize, image_size, batch_size)
    }

    /// Build from tensors already in memory
    ///
    /// # Arguments
    ///
    /// * `images` - `[N, C, H, W]` floats in [0, 1]
    /// * `labels` - `[N]` class indices
    pub fn from_tensors(
        kind: LabeledKind,
        images: Tensor,
        labels: Tensor,
        num_classes: usize,
        image_size: i64,
        batch_size: usize,
    ) -> Result<Self> {
        let dims = images.size();
        if dims.len() != 4 || dims[1] != kind.channels() {
            return Err(Error::mismatch(
                &format!("{} images", kind.name()),
                &[-1, kind.channels(), -1, -1],
                &dims,
            ));
        }
        if labels.size() != [dims[0]] {
            return Err(Error::mismatch("labels", &[dims[0]], &labels.size()));
        }
        if dims[0] == 0 {
            return Err(Error::EmptyDatasetError {
                root: kind.name().into(),
                extensions: Vec::new(),
            });
        }
        if batch_size == 0 || image_size <= 0 {
            return Err(Error::ConfigError(format!(
                "batch size ({batch_size}) and image size ({image_size}) must be > 0"
            )));
        }

        Ok(Self {
            kind,
            images: images.to_kind(Kind::Float),
            labels: labels.to_kind(Kind::Int64),
            num_classes,
            image_size,
            batch_size,
            shuffle: true,
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn kind(&self) -> LabeledKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.images.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather, resize and normalize the samples at `indices`
    fn batch(&self, indices: &[i64], device: Device) -> Result<Batch> {
        let idx = Tensor::from_slice(indices);
        let images = self.images.index_select(0, &idx);
        let labels = self.labels.index_select(0, &idx);

        let resized = images.adaptive_avg_pool2d([self.image_size, self.image_size]);
        let real = (resized * 2.0 - 1.0).to_device(device);
        let condition_classes = Vec::<i64>::try_from(&labels)?
            .into_iter()
            .map(|l| l as usize)
            .collect();

        Ok(Batch {
            real,
            real_classes: labels.to_device(device),
            condition_classes,
            poses: None,
            matte: None,
            synthetic: None,
        })
    }
}

impl BatchSource for LabeledImageSet {
    fn num_batches(&self) -> usize {
        batches_per_epoch(self.len(), self.batch_size)
    }

    fn num_samples(&self) -> usize {
        self.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn channels(&self) -> i64 {
        self.kind.channels()
    }

    fn has_poses(&self) -> bool {
        false
    }

    fn epoch<'a>(
        &'a mut self,
        rng: &mut ChaCha8Rng,
        device: Device,
    ) -> Result<Box<dyn Iterator<Item = Result<Batch>> + 'a>> {
        let mut order: Vec<i64> = (0..self.len() as i64).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        let chunks: Vec<Vec<i64>> = order.chunks(self.batch_size).map(<[i64]>::to_vec).collect();
        let set: &'a LabeledImageSet = self;
        Ok(Box::new(chunks.into_iter().map(move |chunk| set.batch(&chunk, device))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn toy(n: i64, channels: i64) -> (Tensor, Tensor) {
        let images = Tensor::rand([n, channels, 28, 28], (Kind::Float, Device::Cpu));
        let labels = Tensor::arange(n, (Kind::Int64, Device::Cpu)).remainder(10);
        (images, labels)
    }

    #[test]
    fn test_batches_are_resized_and_normalized() {
        let (images, labels) = toy(10, 1);
        let mut set = LabeledImageSet::from_tensors(LabeledKind::Mnist, images, labels, 10, 16, 4).unwrap();
        assert_eq!(set.num_batches(), 3);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let batches: Vec<Batch> = set
            .epoch(&mut rng, Device::Cpu)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].real.size(), vec![4, 1, 16, 16]);
        assert_eq!(batches[2].len(), 2);

        let min: f64 = batches[0].real.min().double_value(&[]);
        let max: f64 = batches[0].real.max().double_value(&[]);
        assert!(min >= -1.0 && max <= 1.0);
        assert!(batches[0].poses.is_none());
    }

    #[test]
    fn test_condition_matches_real_labels() {
        let (images, labels) = toy(6, 3);
        let mut set = LabeledImageSet::from_tensors(LabeledKind::Cifar10, images, labels, 10, 8, 6).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let batch = set.epoch(&mut rng, Device::Cpu).unwrap().next().unwrap().unwrap();

        let real: Vec<i64> = Vec::try_from(&batch.real_classes).unwrap();
        let cond: Vec<i64> = batch.condition_classes.iter().map(|&c| c as i64).collect();
        assert_eq!(real, cond);
    }

    #[test]
    fn test_channel_mismatch_is_rejected() {
        let (images, labels) = toy(4, 3);
        let err = LabeledImageSet::from_tensors(LabeledKind::Mnist, images, labels, 10, 8, 2).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatchError(_)));
    }
}
