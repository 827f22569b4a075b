//! AC-GAN wrapper combining Generator and Discriminator
//!
//! Owns both networks, their variable stores and the device they live on.

use std::path::Path;
use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Tensor};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::error::{Error, Result};

/// Complete AC-GAN model
pub struct ACGAN {
    /// Generator network
    pub generator: Generator,
    /// Discriminator network
    pub discriminator: Discriminator,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for discriminator
    pub disc_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
}

impl ACGAN {
    /// Create a new AC-GAN model
    ///
    /// # Errors
    ///
    /// `ConfigError` if the image size is not a power of two >= 8 or the two
    /// networks disagree on image size or channels.
    pub fn new(gen_config: GeneratorConfig, disc_config: DiscriminatorConfig, device: Device) -> Result<Self> {
        super::upsampling_layers(gen_config.image_size)?;
        if gen_config.image_size != disc_config.image_size || gen_config.channels != disc_config.channels {
            return Err(Error::ConfigError(format!(
                "generator emits {}x{}x{} images but discriminator expects {}x{}x{}",
                gen_config.channels,
                gen_config.image_size,
                gen_config.image_size,
                disc_config.channels,
                disc_config.image_size,
                disc_config.image_size
            )));
        }
        if disc_config.num_classes <= 0 {
            return Err(Error::ConfigError("discriminator needs at least one class".to_string()));
        }

        let gen_vs = VarStore::new(device);
        let disc_vs = VarStore::new(device);

        let generator = Generator::new(&gen_vs.root(), gen_config);
        let discriminator = Discriminator::new(&disc_vs.root(), disc_config);

        Ok(Self {
            generator,
            discriminator,
            gen_vs,
            disc_vs,
            device,
        })
    }

    /// Create an AC-GAN from the usual command-line knobs
    #[allow(clippy::too_many_arguments)]
    pub fn with_defaults(
        image_size: i64,
        channels: i64,
        num_classes: i64,
        latent_dim: i64,
        ngf: i64,
        ndf: i64,
        dropout: f64,
        device: Device,
    ) -> Result<Self> {
        let gen_config = GeneratorConfig {
            latent_dim,
            image_size,
            channels,
            base_filters: ngf,
        };

        let disc_config = DiscriminatorConfig {
            image_size,
            channels,
            base_filters: ndf,
            num_classes,
            dropout,
        };

        Self::new(gen_config, disc_config, device)
    }

    /// Generate images from given latent vectors without tracking gradients
    pub fn generate_from_noise(&self, noise: &Tensor) -> Tensor {
        tch::no_grad(|| self.generator.generate(&noise.to_device(self.device)))
    }

    /// Adam optimizer over the generator parameters
    pub fn gen_optimizer(&self, lr: f64, beta1: f64) -> Result<nn::Optimizer> {
        Ok(adam(beta1).build(&self.gen_vs, lr)?)
    }

    /// Adam optimizer over the discriminator parameters
    pub fn disc_optimizer(&self, lr: f64, beta1: f64) -> Result<nn::Optimizer> {
        Ok(adam(beta1).build(&self.disc_vs, lr)?)
    }

    /// Save both parameter sets
    pub fn save(&self, gen_path: impl AsRef<Path>, disc_path: impl AsRef<Path>) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.disc_vs.save(disc_path)?;
        Ok(())
    }

    /// Load both parameter sets
    pub fn load(&mut self, gen_path: impl AsRef<Path>, disc_path: impl AsRef<Path>) -> Result<()> {
        self.load_generator(gen_path)?;
        self.load_discriminator(disc_path)
    }

    pub fn load_generator(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.gen_vs.load(path)?;
        Ok(())
    }

    pub fn load_discriminator(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.disc_vs.load(path)?;
        Ok(())
    }

    /// Get latent dimension
    pub fn latent_dim(&self) -> i64 {
        self.generator.config().latent_dim
    }

    /// Get image height/width
    pub fn image_size(&self) -> i64 {
        self.generator.config().image_size
    }

    /// Get image channels
    pub fn channels(&self) -> i64 {
        self.generator.config().channels
    }

    /// Get number of classes of the auxiliary head
    pub fn num_classes(&self) -> i64 {
        self.discriminator.config().num_classes
    }
}

fn adam(beta1: f64) -> nn::Adam {
    nn::Adam {
        beta1,
        beta2: 0.999,
        ..Default::default()
    }
}

/// Detached copies of every trainable variable in `vs`
pub fn parameter_snapshot(vs: &VarStore) -> Vec<Tensor> {
    tch::no_grad(|| {
        vs.trainable_variables()
            .iter()
            .map(|v| v.detach().copy())
            .collect()
    })
}

/// Whether any trainable variable differs from `before`
pub fn parameters_changed(before: &[Tensor], vs: &VarStore) -> bool {
    let after = parameter_snapshot(vs);
    before.len() != after.len() || before.iter().zip(&after).any(|(b, a)| !b.equal(a))
}
