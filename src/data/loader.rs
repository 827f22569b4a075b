//! DataLoader for batching and iterating over paired samples
//!
//! Provides batching for GAN training with support for:
//! - Random shuffling from the run's seeded stream
//! - Shared horizontal flips across each render/matte/background triplet
//! - Parallel decoding and a bounded prefetch queue that preserves order

use ndarray::{Array3, Array4, ArrayView3, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tch::Device;
use tracing::debug;

use super::batch::{array_to_tensor, batches_per_epoch, labels_to_tensor, Batch, BatchSource};
use super::dataset::{ImageFileLoader, PairedDataset, PairedSample, SampleLoader};
use super::pose::PoseAnnotation;
use crate::error::{Error, Result};

/// Batching and prefetch options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Number of samples per batch
    pub batch_size: usize,
    /// Whether to shuffle samples each epoch
    pub shuffle: bool,
    /// Whether to mirror triplets at random
    pub hflip: bool,
    /// Decoding threads; 0 decodes inline on the training thread
    pub workers: usize,
    /// Finished batches buffered ahead of the trainer
    pub prefetch: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            shuffle: true,
            hflip: false,
            workers: 2,
            prefetch: 2,
        }
    }
}

/// Collated host-side batch of paired samples
#[derive(Debug, Clone)]
pub struct PairedBatch {
    pub synthetic: Array4<f32>,
    pub real: Array4<f32>,
    pub alpha: Array4<f32>,
    pub synthetic_classes: Vec<usize>,
    pub real_classes: Vec<usize>,
    pub poses: Vec<PoseAnnotation>,
}

impl PairedBatch {
    /// Stack samples along a new leading axis
    pub fn collate(samples: Vec<PairedSample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::ShapeError("cannot collate an empty batch".to_string()));
        }
        let stack = |f: fn(&PairedSample) -> &Array3<f32>| -> Result<Array4<f32>> {
            let views: Vec<ArrayView3<f32>> = samples.iter().map(|s| f(s).view()).collect();
            ndarray::stack(Axis(0), &views).map_err(|e| Error::ShapeMismatchError(format!("collating batch: {e}")))
        };

        Ok(Self {
            synthetic: stack(|s| &s.synthetic_image)?,
            real: stack(|s| &s.real_image)?,
            alpha: stack(|s| &s.alpha_matte)?,
            synthetic_classes: samples.iter().map(|s| s.synthetic_class).collect(),
            real_classes: samples.iter().map(|s| s.real_class).collect(),
            poses: samples.iter().map(|s| s.pose).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.real_classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real_classes.is_empty()
    }

    /// Move onto `device` as a training batch
    pub fn into_batch(self, device: Device) -> Batch {
        Batch {
            real: array_to_tensor(&self.real, device),
            real_classes: labels_to_tensor(&self.real_classes, device),
            condition_classes: self.synthetic_classes,
            poses: Some(self.poses),
            matte: Some(array_to_tensor(&self.alpha, device)),
            synthetic: Some(array_to_tensor(&self.synthetic, device)),
        }
    }
}

/// Sample position plus flip decision
type PlanEntry = (usize, bool);

/// DataLoader over a [`PairedDataset`]
pub struct PairedDataLoader<L: SampleLoader + 'static = ImageFileLoader> {
    dataset: Arc<PairedDataset<L>>,
    config: LoaderConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl<L: SampleLoader + 'static> PairedDataLoader<L> {
    /// Create a new DataLoader
    pub fn new(dataset: PairedDataset<L>, config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::ConfigError("batch size must be > 0".to_string()));
        }
        let pool = if config.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("loader-{i}"))
                .build()
                .map_err(|e| Error::ConfigError(format!("cannot start {} loader threads: {e}", config.workers)))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            dataset: Arc::new(dataset),
            config,
            pool,
        })
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        batches_per_epoch(self.dataset.len(), self.config.batch_size)
    }

    pub fn dataset(&self) -> &PairedDataset<L> {
        &self.dataset
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Visit order and flips for one epoch
    ///
    /// Draws the shuffle first, then one flip per position when flipping is
    /// enabled, so the stream advances identically on every run.
    pub fn epoch_plan(&self, rng: &mut ChaCha8Rng) -> Vec<PlanEntry> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            indices.shuffle(rng);
        }
        indices
            .into_iter()
            .map(|i| (i, self.config.hflip && rng.gen_bool(0.5)))
            .collect()
    }

    /// Host-side batches of one epoch in plan order
    pub fn epoch_batches(&self, rng: &mut ChaCha8Rng) -> EpochBatches {
        let plan = self.epoch_plan(rng);
        let chunks: Vec<Vec<PlanEntry>> = plan
            .chunks(self.config.batch_size)
            .map(<[PlanEntry]>::to_vec)
            .collect();
        debug!("Epoch plan: {} samples in {} batches", plan.len(), chunks.len());

        let dataset = Arc::clone(&self.dataset);
        match &self.pool {
            None => EpochBatches::Inline(Box::new(
                chunks
                    .into_iter()
                    .map(move |chunk| load_batch(&dataset, None, &chunk)),
            )),
            Some(pool) => EpochBatches::Prefetch(PrefetchBatches::spawn(
                dataset,
                Arc::clone(pool),
                chunks,
                self.config.prefetch,
            )),
        }
    }
}

fn load_batch<L: SampleLoader>(
    dataset: &PairedDataset<L>,
    pool: Option<&rayon::ThreadPool>,
    chunk: &[PlanEntry],
) -> Result<PairedBatch> {
    let samples = match pool {
        Some(pool) => pool.install(|| {
            chunk
                .par_iter()
                .map(|&(i, flip)| dataset.get_with_flip(i, flip))
                .collect::<Result<Vec<_>>>()
        })?,
        None => chunk
            .iter()
            .map(|&(i, flip)| dataset.get_with_flip(i, flip))
            .collect::<Result<Vec<_>>>()?,
    };
    PairedBatch::collate(samples)
}

/// Batches of one epoch, loaded inline or by a prefetch thread
pub enum EpochBatches {
    Inline(Box<dyn Iterator<Item = Result<PairedBatch>> + Send>),
    Prefetch(PrefetchBatches),
}

impl Iterator for EpochBatches {
    type Item = Result<PairedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EpochBatches::Inline(iter) => iter.next(),
            EpochBatches::Prefetch(iter) => iter.next(),
        }
    }
}

/// Producer thread feeding a bounded queue
///
/// The producer stops after the first failed batch.
pub struct PrefetchBatches {
    rx: Option<Receiver<Result<PairedBatch>>>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchBatches {
    fn spawn<L: SampleLoader + 'static>(
        dataset: Arc<PairedDataset<L>>,
        pool: Arc<rayon::ThreadPool>,
        chunks: Vec<Vec<PlanEntry>>,
        depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        let handle = thread::spawn(move || {
            for chunk in chunks {
                let batch = load_batch(&dataset, Some(&pool), &chunk);
                let failed = batch.is_err();
                if tx.send(batch).is_err() || failed {
                    return;
                }
            }
        });
        Self {
            rx: Some(rx),
            handle: Some(handle),
        }
    }
}

impl Iterator for PrefetchBatches {
    type Item = Result<PairedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for PrefetchBatches {
    fn drop(&mut self) {
        // Closing the queue first unblocks a producer waiting on a full channel
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<L: SampleLoader + 'static> BatchSource for PairedDataLoader<L> {
    fn num_batches(&self) -> usize {
        PairedDataLoader::num_batches(self)
    }

    fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }

    fn channels(&self) -> i64 {
        3
    }

    fn has_poses(&self) -> bool {
        true
    }

    fn epoch<'a>(
        &'a mut self,
        rng: &mut ChaCha8Rng,
        device: Device,
    ) -> Result<Box<dyn Iterator<Item = Result<Batch>> + 'a>> {
        let batches = self.epoch_batches(rng);
        Ok(Box::new(batches.map(move |b| b.map(|b| b.into_batch(device)))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::index::{PairedSampleIndex, IMG_EXTENSIONS};
    use crate::data::{ImageTransform, LengthPolicy, Pairing};
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn fixture(n_syn: usize, n_real: usize) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let syn = tmp.path().join("syn/chair");
        let real = tmp.path().join("real/chair");
        std::fs::create_dir_all(&syn).unwrap();
        std::fs::create_dir_all(&real).unwrap();
        for i in 0..n_syn {
            let pose = PoseAnnotation::new(i as i32, 0, 0, 1);
            RgbaImage::from_pixel(4, 4, Rgba([i as u8, 0, 0, 255]))
                .save(syn.join(pose.file_name("h", &format!("{i:02}"), "png")))
                .unwrap();
        }
        for i in 0..n_real {
            RgbImage::from_pixel(4, 4, Rgb([0, i as u8, 0]))
                .save(real.join(format!("{i:02}.png")))
                .unwrap();
        }
        tmp
    }

    fn loader(tmp: &TempDir, config: LoaderConfig) -> PairedDataLoader {
        let index = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();
        let ds = PairedDataset::from_index(index, ImageTransform::symmetric(8), LengthPolicy::Wrap, Pairing::Index)
            .unwrap();
        PairedDataLoader::new(ds, config).unwrap()
    }

    fn config(batch_size: usize, workers: usize) -> LoaderConfig {
        LoaderConfig {
            batch_size,
            shuffle: true,
            hflip: true,
            workers,
            prefetch: 1,
        }
    }

    #[test]
    fn test_batch_count_and_last_batch() {
        let tmp = fixture(10, 4);
        let l = loader(&tmp, config(4, 0));
        assert_eq!(l.num_batches(), 3);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sizes: Vec<usize> = l.epoch_batches(&mut rng).map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_plan_is_seeded_permutation() {
        let tmp = fixture(10, 10);
        let l = loader(&tmp, config(4, 0));
        let a = l.epoch_plan(&mut ChaCha8Rng::seed_from_u64(3));
        let b = l.epoch_plan(&mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);

        let mut seen: Vec<usize> = a.iter().map(|(i, _)| *i).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_prefetch_preserves_plan_order() {
        let tmp = fixture(9, 9);
        let l = loader(&tmp, config(2, 3));
        let plan = l.epoch_plan(&mut ChaCha8Rng::seed_from_u64(11));
        let expected: Vec<i32> = plan
            .iter()
            .map(|(i, _)| l.dataset().resolve(*i).unwrap().0.pose.azimuth)
            .collect();

        let got: Vec<i32> = l
            .epoch_batches(&mut ChaCha8Rng::seed_from_u64(11))
            .flat_map(|b| b.unwrap().poses)
            .map(|p| p.azimuth)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_dropping_prefetch_early_does_not_hang() {
        let tmp = fixture(12, 12);
        let l = loader(&tmp, config(1, 2));
        let mut batches = l.epoch_batches(&mut ChaCha8Rng::seed_from_u64(0));
        assert!(batches.next().unwrap().is_ok());
        drop(batches);
    }

    #[test]
    fn test_into_batch_shapes() {
        let tmp = fixture(4, 4);
        let mut l = loader(&tmp, config(4, 0));
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let batch = BatchSource::epoch(&mut l, &mut rng, Device::Cpu)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(batch.real.size(), vec![4, 3, 8, 8]);
        assert_eq!(batch.matte.as_ref().unwrap().size(), vec![4, 1, 8, 8]);
        assert_eq!(batch.real_classes.size(), vec![4]);
        assert_eq!(batch.poses.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let tmp = fixture(2, 2);
        let index = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();
        let ds = PairedDataset::from_index(index, ImageTransform::symmetric(8), LengthPolicy::Wrap, Pairing::Index)
            .unwrap();
        assert!(PairedDataLoader::new(ds, config(0, 0)).is_err());
    }
}
