//! Shared transform pipeline: resize, optional flip, CHW conversion, normalization
//!
//! The same transform (including the flip decision) is applied to the color
//! render, its alpha matte and the background so the three stay pixel-aligned.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Pixel, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Resize + normalize parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageTransform {
    /// Output height and width
    pub size: u32,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: f32,
    /// Per-channel std divisor
    pub std: f32,
}

impl ImageTransform {
    /// Maps pixels into [-1, 1]
    pub fn symmetric(size: u32) -> Self {
        Self {
            size,
            mean: 0.5,
            std: 0.5,
        }
    }

    pub fn apply_rgb(&self, image: &RgbImage, flip: bool) -> Array3<f32> {
        self.apply(image, flip)
    }

    pub fn apply_gray(&self, image: &GrayImage, flip: bool) -> Array3<f32> {
        self.apply(image, flip)
    }

    /// Undo normalization for a single value
    pub fn denormalize(&self, value: f32) -> f32 {
        value * self.std + self.mean
    }

    fn apply<P>(&self, image: &ImageBuffer<P, Vec<u8>>, flip: bool) -> Array3<f32>
    where
        P: Pixel<Subpixel = u8> + 'static,
    {
        let resized = if image.width() == self.size && image.height() == self.size {
            image.clone()
        } else {
            imageops::resize(image, self.size, self.size, FilterType::Triangle)
        };
        let resized = if flip {
            imageops::flip_horizontal(&resized)
        } else {
            resized
        };

        let channels = P::CHANNEL_COUNT as usize;
        let side = self.size as usize;
        let mut out = Array3::<f32>::zeros((channels, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &v) in pixel.channels().iter().enumerate() {
                out[[c, y as usize, x as usize]] = (v as f32 / 255.0 - self.mean) / self.std;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::{Luma, Rgb};

    #[test]
    fn test_output_shape_and_range() {
        let img = RgbImage::from_pixel(10, 6, Rgb([255, 0, 128]));
        let t = ImageTransform::symmetric(8).apply_rgb(&img, false);
        assert_eq!(t.shape(), &[3, 8, 8]);
        assert_abs_diff_eq!(t[[0, 3, 3]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(t[[1, 3, 3]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(t[[2, 0, 0]], 128.0 / 255.0 * 2.0 - 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_flip_keeps_matte_aligned_with_color() {
        let mut color = RgbImage::new(4, 4);
        let mut matte = GrayImage::new(4, 4);
        color.put_pixel(0, 1, Rgb([255, 255, 255]));
        matte.put_pixel(0, 1, Luma([255]));

        let tf = ImageTransform::symmetric(4);
        let c = tf.apply_rgb(&color, true);
        let m = tf.apply_gray(&matte, true);
        assert_eq!(m.shape(), &[1, 4, 4]);
        assert_abs_diff_eq!(c[[0, 1, 3]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(m[[0, 1, 3]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(m[[0, 1, 0]], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_denormalize() {
        let tf = ImageTransform::symmetric(4);
        assert_abs_diff_eq!(tf.denormalize(-1.0), 0.0);
        assert_abs_diff_eq!(tf.denormalize(1.0), 1.0);
    }
}
