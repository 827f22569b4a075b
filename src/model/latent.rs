//! Conditioned latent vectors
//!
//! Each latent row is standard-normal noise whose leading columns are
//! overwritten by a condition block: a one-hot class followed, when pose
//! conditioning is on, by one one-hot per binned pose axis.

use ndarray::{s, Array2};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::data::PoseAnnotation;
use crate::error::{Error, Result};

/// Discretization of one pose axis into `bins` equal-width buckets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseAxis {
    /// Number of buckets; 0 leaves the axis out of the condition block
    pub bins: usize,
    pub min: f64,
    pub max: f64,
    /// Periodic axis (angles that wrap around)
    pub wrap: bool,
}

impl PoseAxis {
    pub fn new(bins: usize, min: f64, max: f64, wrap: bool) -> Self {
        Self {
            bins,
            min,
            max,
            wrap,
        }
    }

    /// Bucket of `value`; out-of-range values clamp (or wrap on periodic axes)
    pub fn bin(&self, value: i32) -> usize {
        if self.bins == 0 {
            return 0;
        }
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0;
        }
        let offset = value as f64 - self.min;
        let frac = if self.wrap {
            offset.rem_euclid(span) / span
        } else {
            (offset / span).clamp(0.0, 1.0)
        };
        ((frac * self.bins as f64).floor() as usize).min(self.bins - 1)
    }
}

/// Binning for the four pose fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseBinning {
    pub azimuth: PoseAxis,
    pub elevation: PoseAxis,
    pub tilt: PoseAxis,
    pub distance: PoseAxis,
}

impl Default for PoseBinning {
    fn default() -> Self {
        Self {
            azimuth: PoseAxis::new(8, 0.0, 360.0, true),
            elevation: PoseAxis::new(4, -90.0, 90.0, false),
            tilt: PoseAxis::new(4, -180.0, 180.0, false),
            distance: PoseAxis::new(2, 0.0, 10.0, false),
        }
    }
}

impl PoseBinning {
    fn axes(&self) -> [&PoseAxis; 4] {
        [&self.azimuth, &self.elevation, &self.tilt, &self.distance]
    }

    /// Total one-hot width across all axes
    pub fn width(&self) -> usize {
        self.axes().iter().map(|a| a.bins).sum()
    }
}

/// Layout of the condition block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub num_classes: usize,
    /// `None` conditions on class only
    pub pose: Option<PoseBinning>,
}

impl ConditionSpec {
    pub fn class_only(num_classes: usize) -> Self {
        Self {
            num_classes,
            pose: None,
        }
    }

    pub fn with_pose(num_classes: usize, binning: PoseBinning) -> Self {
        Self {
            num_classes,
            pose: Some(binning),
        }
    }

    pub fn width(&self) -> usize {
        self.num_classes + self.pose.map(|p| p.width()).unwrap_or(0)
    }
}

/// Builds conditioned latent batches
#[derive(Debug, Clone)]
pub struct LatentEncoder {
    latent_dim: usize,
    spec: ConditionSpec,
}

impl LatentEncoder {
    /// # Errors
    ///
    /// `ConfigError` when there are no classes or the condition block does not
    /// fit in `latent_dim`.
    pub fn new(latent_dim: usize, spec: ConditionSpec) -> Result<Self> {
        if spec.num_classes == 0 {
            return Err(Error::ConfigError("condition needs at least one class".to_string()));
        }
        if latent_dim < spec.width() {
            return Err(Error::ConfigError(format!(
                "latent dimension {} is smaller than the condition width {} ({} classes{})",
                latent_dim,
                spec.width(),
                spec.num_classes,
                if spec.pose.is_some() { " + pose bins" } else { "" }
            )));
        }
        Ok(Self { latent_dim, spec })
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn num_condition_dims(&self) -> usize {
        self.spec.width()
    }

    pub fn spec(&self) -> &ConditionSpec {
        &self.spec
    }

    /// Condition block for one sample
    ///
    /// With pose conditioning enabled but no pose given, the pose segments
    /// stay zero.
    pub fn condition_block(&self, class_index: usize, pose: Option<&PoseAnnotation>) -> Result<Vec<f32>> {
        if class_index >= self.spec.num_classes {
            return Err(Error::ConfigError(format!(
                "class index {} out of range for {} classes",
                class_index, self.spec.num_classes
            )));
        }
        let mut block = vec![0.0f32; self.num_condition_dims()];
        block[class_index] = 1.0;

        if let (Some(binning), Some(pose)) = (self.spec.pose, pose) {
            let mut offset = self.spec.num_classes;
            for (axis, value) in binning.axes().iter().zip(pose.as_array()) {
                if axis.bins == 0 {
                    continue;
                }
                block[offset + axis.bin(value)] = 1.0;
                offset += axis.bins;
            }
        }
        Ok(block)
    }

    /// Draw a `[classes.len(), latent_dim]` batch and write the conditions in
    pub fn encode<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        classes: &[usize],
        poses: Option<&[PoseAnnotation]>,
    ) -> Result<Array2<f32>> {
        let mut latent = Array2::<f32>::random_using((classes.len(), self.latent_dim), StandardNormal, rng);
        self.write_condition(&mut latent, classes, poses)?;
        Ok(latent)
    }

    /// Overwrite the condition columns of an existing batch
    pub fn write_condition(
        &self,
        latent: &mut Array2<f32>,
        classes: &[usize],
        poses: Option<&[PoseAnnotation]>,
    ) -> Result<()> {
        if latent.ncols() != self.latent_dim || latent.nrows() != classes.len() {
            return Err(Error::ShapeMismatchError(format!(
                "latent batch is {:?}, expected [{}, {}]",
                latent.shape(),
                classes.len(),
                self.latent_dim
            )));
        }
        if let Some(poses) = poses {
            if poses.len() != classes.len() {
                return Err(Error::ShapeMismatchError(format!(
                    "{} poses for {} class labels",
                    poses.len(),
                    classes.len()
                )));
            }
        }

        let width = self.num_condition_dims();
        for (row, &class_index) in classes.iter().enumerate() {
            let pose = poses.map(|p| &p[row]);
            let block = self.condition_block(class_index, pose)?;
            latent
                .slice_mut(s![row, ..width])
                .iter_mut()
                .zip(block)
                .for_each(|(dst, v)| *dst = v);
        }
        Ok(())
    }

    /// Latent batch reused across evaluation snapshots
    pub fn fixed<R: Rng + ?Sized>(&self, rng: &mut R, batch_size: usize) -> Result<FixedLatent> {
        let classes: Vec<usize> = (0..batch_size)
            .map(|_| rng.gen_range(0..self.spec.num_classes))
            .collect();
        let latent = self.encode(rng, &classes, None)?;
        Ok(FixedLatent {
            latent,
            classes,
            poses: None,
        })
    }
}

/// Fixed evaluation latent; only its condition slice may change
#[derive(Debug, Clone)]
pub struct FixedLatent {
    latent: Array2<f32>,
    classes: Vec<usize>,
    poses: Option<Vec<PoseAnnotation>>,
}

impl FixedLatent {
    pub fn latent(&self) -> &Array2<f32> {
        &self.latent
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn poses(&self) -> Option<&[PoseAnnotation]> {
        self.poses.as_deref()
    }

    pub fn has_poses(&self) -> bool {
        self.poses.is_some()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Rewrite the condition slice, cycling `classes`/`poses` to the fixed size
    pub fn refresh_condition(
        &mut self,
        encoder: &LatentEncoder,
        classes: &[usize],
        poses: Option<&[PoseAnnotation]>,
    ) -> Result<()> {
        if classes.is_empty() {
            return Err(Error::ShapeError("no conditions to refresh from".to_string()));
        }
        let n = self.len();
        let classes: Vec<usize> = classes.iter().copied().cycle().take(n).collect();
        let poses: Option<Vec<PoseAnnotation>> =
            poses.map(|p| p.iter().copied().cycle().take(n).collect());

        encoder.write_condition(&mut self.latent, &classes, poses.as_deref())?;
        self.classes = classes;
        self.poses = poses;
        Ok(())
    }
}
