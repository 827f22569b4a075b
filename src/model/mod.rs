//! Model module containing the AC-GAN components
//!
//! This module provides:
//! - Generator network producing foreground renders from conditioned noise
//! - Discriminator with source and auxiliary class heads
//! - ACGAN wrapper owning both networks and their variable stores
//! - Latent encoder injecting class and pose into the noise vector
//! - Alpha compositor blending foregrounds onto backgrounds

mod acgan;
pub mod compositor;
mod discriminator;
mod generator;
pub mod latent;

pub use acgan::{parameter_snapshot, parameters_changed, ACGAN};
pub use compositor::{composite, unit_matte};
pub use discriminator::{Discriminator, DiscriminatorConfig, DiscriminatorOutput};
pub use generator::{Generator, GeneratorConfig};
pub use latent::{ConditionSpec, FixedLatent, LatentEncoder, PoseAxis, PoseBinning};

use crate::error::{Error, Result};

/// Number of stride-2 layers between 4x4 and `image_size`, plus the 4x4 stage
///
/// `image_size` must be a power of two no smaller than 8.
pub fn upsampling_layers(image_size: i64) -> Result<usize> {
    if image_size < 8 || image_size & (image_size - 1) != 0 {
        return Err(Error::ConfigError(format!(
            "image size must be a power of two >= 8, got {image_size}"
        )));
    }
    Ok(image_size.trailing_zeros() as usize - 2)
}
