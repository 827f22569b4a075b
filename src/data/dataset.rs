//! Paired dataset: one synthetic render (color + alpha matte) and one real
//! background per index

use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::index::{PairedSampleIndex, RealSample, SyntheticSample};
use super::pose::PoseAnnotation;
use super::transform::ImageTransform;
use crate::error::{Error, Result};

/// How an index is resolved against two lists of different length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthPolicy {
    /// `index mod len` on each list
    #[default]
    Wrap,
    /// Construction fails unless both lists have the same length
    RequireEqual,
}

/// How a background is chosen for a synthetic sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    /// Same position in the real list
    #[default]
    Index,
    /// A real sample of the synthetic sample's class
    MatchClass,
}

/// Capability for decoding sample files
pub trait SampleLoader: Send + Sync {
    /// Decode a render into its color image and alpha matte
    fn load_synthetic(&self, path: &Path) -> Result<(RgbImage, GrayImage)>;

    /// Decode a background as RGB
    fn load_real(&self, path: &Path) -> Result<RgbImage>;
}

/// Decodes files from disk with the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileLoader;

impl ImageFileLoader {
    fn open(path: &Path) -> Result<DynamicImage> {
        image::open(path).map_err(|source| match source {
            image::ImageError::IoError(e) => Error::io(path, e),
            source => Error::ImageError {
                path: path.to_path_buf(),
                source,
            },
        })
    }
}

impl SampleLoader for ImageFileLoader {
    fn load_synthetic(&self, path: &Path) -> Result<(RgbImage, GrayImage)> {
        let img = Self::open(path)?;
        if !img.color().has_alpha() {
            return Err(Error::ShapeError(format!(
                "synthetic image {} has no alpha channel ({:?})",
                path.display(),
                img.color()
            )));
        }
        Ok(split_alpha(&img))
    }

    fn load_real(&self, path: &Path) -> Result<RgbImage> {
        Ok(Self::open(path)?.to_rgb8())
    }
}

/// Separate an RGBA image into color and matte
pub fn split_alpha(img: &DynamicImage) -> (RgbImage, GrayImage) {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut color = RgbImage::new(w, h);
    let mut matte = GrayImage::new(w, h);
    for (x, y, p) in rgba.enumerate_pixels() {
        color.put_pixel(x, y, image::Rgb([p[0], p[1], p[2]]));
        matte.put_pixel(x, y, image::Luma([p[3]]));
    }
    (color, matte)
}

/// One transformed pair
#[derive(Debug, Clone)]
pub struct PairedSample {
    /// Render color, `[3, S, S]`
    pub synthetic_image: Array3<f32>,
    /// Background, `[3, S, S]`
    pub real_image: Array3<f32>,
    /// Render matte, `[1, S, S]`, same normalization as the images
    pub alpha_matte: Array3<f32>,
    pub synthetic_class: usize,
    pub real_class: usize,
    pub pose: PoseAnnotation,
}

impl PairedSample {
    /// Flat form: images, matte, classes and the four pose fields
    #[allow(clippy::type_complexity)]
    pub fn into_tuple(
        self,
    ) -> (Array3<f32>, Array3<f32>, Array3<f32>, usize, usize, i32, i32, i32, i32) {
        let p = self.pose;
        (
            self.synthetic_image,
            self.real_image,
            self.alpha_matte,
            self.synthetic_class,
            self.real_class,
            p.azimuth,
            p.elevation,
            p.tilt,
            p.distance,
        )
    }
}

/// Dataset over a `PairedSampleIndex`
pub struct PairedDataset<L: SampleLoader = ImageFileLoader> {
    index: PairedSampleIndex,
    loader: L,
    transform: ImageTransform,
    length_policy: LengthPolicy,
    pairing: Pairing,
    /// Real-list positions grouped by class, for `Pairing::MatchClass`
    real_by_class: Vec<Vec<usize>>,
}

impl PairedDataset<ImageFileLoader> {
    pub fn from_index(
        index: PairedSampleIndex,
        transform: ImageTransform,
        length_policy: LengthPolicy,
        pairing: Pairing,
    ) -> Result<Self> {
        Self::with_loader(index, ImageFileLoader, transform, length_policy, pairing)
    }
}

impl<L: SampleLoader> PairedDataset<L> {
    pub fn with_loader(
        index: PairedSampleIndex,
        loader: L,
        transform: ImageTransform,
        length_policy: LengthPolicy,
        pairing: Pairing,
    ) -> Result<Self> {
        let (syn_len, real_len) = (index.synthetic().len(), index.real().len());
        if length_policy == LengthPolicy::RequireEqual && syn_len != real_len {
            return Err(Error::ConfigError(format!(
                "length policy requires equal stream sizes, found {syn_len} synthetic and {real_len} real samples"
            )));
        }

        let mut real_by_class = vec![Vec::new(); index.num_classes()];
        for (pos, sample) in index.real().iter().enumerate() {
            real_by_class[sample.class_index].push(pos);
        }

        Ok(Self {
            index,
            loader,
            transform,
            length_policy,
            pairing,
            real_by_class,
        })
    }

    /// `max(len(synthetic), len(real))`
    pub fn len(&self) -> usize {
        self.index.synthetic().len().max(self.index.real().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_classes(&self) -> usize {
        self.index.num_classes()
    }

    pub fn index(&self) -> &PairedSampleIndex {
        &self.index
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    /// Entries the two streams contribute for `index`
    pub fn resolve(&self, index: usize) -> Result<(&SyntheticSample, &RealSample)> {
        let len = self.len();
        if index >= len {
            return Err(Error::ConfigError(format!(
                "sample index {index} out of range for dataset of length {len}"
            )));
        }
        let synthetic = self.index.synthetic();
        let real = self.index.real();

        let syn = &synthetic[index % synthetic.len()];
        let real_pos = match self.pairing {
            Pairing::Index => index % real.len(),
            Pairing::MatchClass => match self.real_by_class.get(syn.class_index) {
                Some(same) if !same.is_empty() => same[index % same.len()],
                _ => index % real.len(),
            },
        };
        // RequireEqual guarantees the modulo is the identity
        debug_assert!(self.length_policy == LengthPolicy::Wrap || index < real.len());
        Ok((syn, &real[real_pos]))
    }

    /// Load and transform the pair at `index`
    pub fn get(&self, index: usize) -> Result<PairedSample> {
        self.get_with_flip(index, false)
    }

    /// As [`get`](Self::get), mirroring all three images when `flip` is set
    pub fn get_with_flip(&self, index: usize, flip: bool) -> Result<PairedSample> {
        let (syn, real) = self.resolve(index)?;

        let (color, matte) = self.loader.load_synthetic(&syn.path)?;
        if color.dimensions() != matte.dimensions() {
            return Err(Error::ShapeMismatchError(format!(
                "matte of {} is {:?}, color is {:?}",
                syn.path.display(),
                matte.dimensions(),
                color.dimensions()
            )));
        }
        let background = self.loader.load_real(&real.path)?;

        Ok(PairedSample {
            synthetic_image: self.transform.apply_rgb(&color, flip),
            real_image: self.transform.apply_rgb(&background, flip),
            alpha_matte: self.transform.apply_gray(&matte, flip),
            synthetic_class: syn.class_index,
            real_class: real.class_index,
            pose: syn.pose,
        })
    }
}

impl<L: SampleLoader> fmt::Debug for PairedDataset<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedDataset")
            .field("len", &self.len())
            .field("root", &self.index.root())
            .field("num_classes", &self.num_classes())
            .field("transform", &self.transform)
            .field("length_policy", &self.length_policy)
            .field("pairing", &self.pairing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::index::IMG_EXTENSIONS;
    use image::{Rgb, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_fixture(syn_per_class: usize, real_per_class: usize) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (c, class) in ["cat", "dog"].iter().enumerate() {
            let syn_dir = tmp.path().join("syn").join(class);
            let real_dir = tmp.path().join("real").join(class);
            std::fs::create_dir_all(&syn_dir).unwrap();
            std::fs::create_dir_all(&real_dir).unwrap();
            for i in 0..syn_per_class {
                let pose = PoseAnnotation::new(i as i32 * 45, 10, 0, c as i32);
                let img = RgbaImage::from_pixel(6, 6, Rgba([200, 10, 10, 255]));
                img.save(syn_dir.join(pose.file_name("h", &format!("{i}"), "png"))).unwrap();
            }
            for i in 0..real_per_class {
                let img = RgbImage::from_pixel(12, 9, Rgb([0, 0, 255]));
                img.save(real_dir.join(format!("bg_{i}.png"))).unwrap();
            }
        }
        tmp
    }

    fn dataset(tmp: &TempDir, policy: LengthPolicy, pairing: Pairing) -> Result<PairedDataset> {
        let index = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS)?;
        PairedDataset::from_index(index, ImageTransform::symmetric(8), policy, pairing)
    }

    #[test]
    fn test_get_returns_aligned_triplet() {
        let tmp = write_fixture(2, 2);
        let ds = dataset(&tmp, LengthPolicy::Wrap, Pairing::Index).unwrap();
        assert_eq!(ds.len(), 4);

        let sample = ds.get(3).unwrap();
        assert_eq!(sample.synthetic_image.shape(), &[3, 8, 8]);
        assert_eq!(sample.real_image.shape(), &[3, 8, 8]);
        assert_eq!(sample.alpha_matte.shape(), &[1, 8, 8]);
        assert_eq!(sample.synthetic_class, 1);
        assert_eq!(sample.real_class, 1);
        assert_eq!(sample.pose, PoseAnnotation::new(45, 10, 0, 1));
        assert!((sample.alpha_matte[[0, 4, 4]] - 1.0).abs() < 1e-6);
        assert!((sample.real_image[[2, 0, 0]] - 1.0).abs() < 1e-6);

        let tuple = sample.into_tuple();
        assert_eq!((tuple.5, tuple.6, tuple.7, tuple.8), (45, 10, 0, 1));
    }

    #[test]
    fn test_length_is_max_and_wraps() {
        let tmp = write_fixture(3, 1);
        let ds = dataset(&tmp, LengthPolicy::Wrap, Pairing::Index).unwrap();
        assert_eq!(ds.len(), 6);
        let (_, real) = ds.resolve(5).unwrap();
        assert_eq!(real.path, ds.index().real()[1].path);
        assert!(ds.get(6).is_err());
    }

    #[test]
    fn test_require_equal_rejects_mismatched_streams() {
        let tmp = write_fixture(3, 1);
        let err = dataset(&tmp, LengthPolicy::RequireEqual, Pairing::Index).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_match_class_pairing() {
        let tmp = write_fixture(3, 1);
        let ds = dataset(&tmp, LengthPolicy::Wrap, Pairing::MatchClass).unwrap();
        for i in 0..ds.len() {
            let (syn, real) = ds.resolve(i).unwrap();
            assert_eq!(syn.class_index, real.class_index);
        }
    }

    #[test]
    fn test_missing_alpha_is_shape_error() {
        let tmp = write_fixture(1, 1);
        let opaque = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        opaque
            .save(tmp.path().join("syn/cat").join(PoseAnnotation::default().file_name("h", "x", "png")))
            .unwrap();
        let ds = dataset(&tmp, LengthPolicy::Wrap, Pairing::Index).unwrap();
        // cat/h_0 keeps its alpha, cat/h_x sorts after it
        assert!(ds.get(0).is_ok());
        let err = ds.get(1).unwrap_err();
        assert!(matches!(err, Error::ShapeError(_)));
    }

    #[test]
    fn test_undecodable_file_is_image_error() {
        let tmp = write_fixture(1, 1);
        std::fs::write(tmp.path().join("real/cat/bg_0.png"), b"not a png").unwrap();
        let ds = dataset(&tmp, LengthPolicy::Wrap, Pairing::Index).unwrap();
        let err = ds.get(0).unwrap_err();
        assert!(matches!(err, Error::ImageError { .. }));
    }
}
