//! Generator network for the AC-GAN
//!
//! Maps a conditioned latent vector to an image. Architecture follows DCGAN:
//! a stack of 2D transposed convolutions that starts at 4x4 and doubles the
//! spatial size per layer.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Size of the latent vector (condition block included)
    pub latent_dim: i64,
    /// Height and width of generated images, a power of two >= 8
    pub image_size: i64,
    /// Output channels (3 for RGB)
    pub channels: i64,
    /// Filters of the last hidden layer (`ngf`)
    pub base_filters: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            image_size: 64,
            channels: 3,
            base_filters: 64,
        }
    }
}

/// Generator network
///
/// Architecture:
/// 1. ConvTranspose2d from `[latent, 1, 1]` to `[ngf * 2^(n-1), 4, 4]`
/// 2. `n - 1` stride-2 ConvTranspose2d layers halving the filters, each with
///    BatchNorm and ReLU
/// 3. Final stride-2 ConvTranspose2d to `channels` with Tanh
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    blocks: Vec<(nn::ConvTranspose2D, nn::BatchNorm)>,
    output: nn::ConvTranspose2D,
}

impl Generator {
    /// Create a new Generator network
    ///
    /// `config.image_size` must already be validated with
    /// [`upsampling_layers`](super::upsampling_layers).
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let layers = super::upsampling_layers(config.image_size).unwrap_or(1);
        let no_bias = |stride, padding| nn::ConvTransposeConfig {
            stride,
            padding,
            bias: false,
            ..Default::default()
        };

        let mut blocks = Vec::with_capacity(layers);
        let mut filters = config.base_filters * (1 << (layers - 1));
        let mut in_channels = config.latent_dim;
        for i in 0..layers {
            let (stride, padding) = if i == 0 { (1, 0) } else { (2, 1) };
            let conv = nn::conv_transpose2d(
                vs / format!("conv{i}"),
                in_channels,
                filters,
                4,
                no_bias(stride, padding),
            );
            let bn = nn::batch_norm2d(vs / format!("bn{i}"), filters, Default::default());
            blocks.push((conv, bn));
            in_channels = filters;
            filters /= 2;
        }

        let output = nn::conv_transpose2d(vs / "output", in_channels, config.channels, 4, no_bias(2, 1));

        Self {
            config,
            blocks,
            output,
        }
    }

    /// Generate images from latent vectors
    ///
    /// # Arguments
    ///
    /// * `noise` - Tensor of shape (batch_size, latent_dim)
    /// * `train` - Whether in training mode (affects batch norm)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, channels, image_size, image_size) in [-1, 1]
    pub fn forward_t(&self, noise: &Tensor, train: bool) -> Tensor {
        let batch_size = noise.size()[0];
        let mut x = noise.view([batch_size, self.config.latent_dim, 1, 1]);
        for (conv, bn) in &self.blocks {
            x = bn.forward_t(&conv.forward(&x), train).relu();
        }
        self.output.forward(&x).tanh()
    }

    /// Generate samples (inference mode)
    pub fn generate(&self, noise: &Tensor) -> Tensor {
        self.forward_t(noise, false)
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        Generator::forward_t(self, xs, train)
    }
}
