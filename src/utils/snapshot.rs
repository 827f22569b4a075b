//! Image grid snapshots of real, reference and generated batches

use image::{Rgb, RgbImage};
use std::path::Path;
use tch::{Kind, Tensor};

/// Columns of a snapshot grid
pub const GRID_COLUMNS: usize = 8;
/// Padding between grid cells, in pixels
pub const GRID_PADDING: u32 = 2;

/// Tile a `[B, C, H, W]` batch in [-1, 1] into one RGB image
///
/// Single-channel batches are rendered as gray. Cells are laid out row-major
/// `nrow` per line, separated by black padding.
pub fn image_grid(images: &Tensor, nrow: usize) -> anyhow::Result<RgbImage> {
    let dims = images.size();
    if dims.len() != 4 || !(dims[1] == 1 || dims[1] == 3) {
        anyhow::bail!("expected a [B, 1|3, H, W] batch, got {:?}", dims);
    }
    let (batch, channels, height, width) = (dims[0] as usize, dims[1] as usize, dims[2] as u32, dims[3] as u32);
    if batch == 0 {
        anyhow::bail!("cannot render an empty batch");
    }

    let pixels: Vec<u8> = Vec::try_from(
        &tch::no_grad(|| {
            ((images.detach().to_device(tch::Device::Cpu) + 1.0) * 127.5)
                .clamp(0.0, 255.0)
                .round()
                .to_kind(Kind::Uint8)
        })
        .flatten(0, -1),
    )?;

    let cols = nrow.clamp(1, batch) as u32;
    let rows = batch.div_ceil(cols as usize) as u32;
    let mut grid = RgbImage::new(
        cols * (width + GRID_PADDING) + GRID_PADDING,
        rows * (height + GRID_PADDING) + GRID_PADDING,
    );

    let plane = (height * width) as usize;
    for b in 0..batch {
        let x0 = GRID_PADDING + (b as u32 % cols) * (width + GRID_PADDING);
        let y0 = GRID_PADDING + (b as u32 / cols) * (height + GRID_PADDING);
        let base = b * channels * plane;
        for y in 0..height {
            for x in 0..width {
                let at = base + (y * width + x) as usize;
                let px = if channels == 1 {
                    Rgb([pixels[at]; 3])
                } else {
                    Rgb([pixels[at], pixels[at + plane], pixels[at + 2 * plane]])
                };
                grid.put_pixel(x0 + x, y0 + y, px);
            }
        }
    }
    Ok(grid)
}

/// Render `images` with [`image_grid`] and write it to `path`
pub fn save_image_grid(images: &Tensor, path: impl AsRef<Path>, nrow: usize) -> anyhow::Result<()> {
    let path = path.as_ref();
    image_grid(images, nrow)?.save(path)?;
    tracing::debug!("Wrote snapshot {}", path.display());
    Ok(())
}
