//! Device-resident training batches and the sources that produce them

use ndarray::{Array, Dimension};
use rand_chacha::ChaCha8Rng;
use tch::{Device, Tensor};

use super::pose::PoseAnnotation;
use crate::error::Result;

/// One batch as consumed by the adversarial trainer
#[derive(Debug)]
pub struct Batch {
    /// Real images, `[B, C, S, S]` in [-1, 1]
    pub real: Tensor,
    /// Class labels of `real`, int64 `[B]`
    pub real_classes: Tensor,
    /// Class labels used to condition the generator
    pub condition_classes: Vec<usize>,
    /// Poses used to condition the generator, if the source has them
    pub poses: Option<Vec<PoseAnnotation>>,
    /// Alpha mattes of the synthetic renders, `[B, 1, S, S]` in [-1, 1]
    pub matte: Option<Tensor>,
    /// Color of the synthetic renders, `[B, 3, S, S]` in [-1, 1]
    pub synthetic: Option<Tensor>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.condition_classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.condition_classes.is_empty()
    }

    /// Generator condition labels as an int64 tensor
    pub fn condition_tensor(&self, device: Device) -> Tensor {
        labels_to_tensor(&self.condition_classes, device)
    }
}

/// Anything the trainer can iterate epoch by epoch
pub trait BatchSource {
    /// Batches per epoch
    fn num_batches(&self) -> usize;

    /// Samples per epoch
    fn num_samples(&self) -> usize;

    /// Number of class labels
    fn num_classes(&self) -> usize;

    /// Image channels
    fn channels(&self) -> i64;

    /// Whether batches carry poses for pose conditioning
    fn has_poses(&self) -> bool;

    /// Batches of one epoch; the shuffle order is drawn from `rng` up front
    fn epoch<'a>(
        &'a mut self,
        rng: &mut ChaCha8Rng,
        device: Device,
    ) -> Result<Box<dyn Iterator<Item = Result<Batch>> + 'a>>;
}

/// Copy an `f32` array into a tensor of the same shape
pub fn array_to_tensor<D: Dimension>(array: &Array<f32, D>, device: Device) -> Tensor {
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let data: Vec<f32> = match array.as_slice() {
        Some(slice) => slice.to_vec(),
        None => array.iter().copied().collect(),
    };
    Tensor::from_slice(&data).view(shape.as_slice()).to_device(device)
}

/// Class indices as an int64 tensor
pub fn labels_to_tensor(labels: &[usize], device: Device) -> Tensor {
    let labels: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    Tensor::from_slice(&labels).to_device(device)
}

/// `ceil(num_samples / batch_size)`
pub fn batches_per_epoch(num_samples: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        num_samples.div_ceil(batch_size)
    }
}
