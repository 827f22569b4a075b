//! Auxiliary-classifier discriminator
//!
//! Strided 2D convolutions shrink the image to 4x4; two heads then predict
//! the source (real vs. generated) and the class label.

use tch::{nn, nn::Module, nn::ModuleT, Kind, Tensor};

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Height and width of input images, a power of two >= 8
    pub image_size: i64,
    /// Input channels
    pub channels: i64,
    /// Filters of the first layer (`ndf`)
    pub base_filters: i64,
    /// Number of classes for the auxiliary head
    pub num_classes: i64,
    /// Dropout rate after each convolution
    pub dropout: f64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            image_size: 64,
            channels: 3,
            base_filters: 64,
            num_classes: 10,
            dropout: 0.5,
        }
    }
}

/// Discriminator outputs for one batch
#[derive(Debug)]
pub struct DiscriminatorOutput {
    /// Source logits, shape (batch_size,)
    pub source_logits: Tensor,
    /// Class log-probabilities, shape (batch_size, num_classes)
    pub class_log_probs: Tensor,
}

impl DiscriminatorOutput {
    /// Mean probability of "real"
    pub fn mean_score(&self) -> f64 {
        self.source_logits
            .sigmoid()
            .mean(Kind::Float)
            .double_value(&[])
    }
}

/// Discriminator network
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    input: nn::Conv2D,
    blocks: Vec<(nn::Conv2D, nn::BatchNorm)>,
    source_head: nn::Linear,
    class_head: nn::Linear,
}

impl Discriminator {
    /// Create a new Discriminator network
    pub fn new(vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let layers = super::upsampling_layers(config.image_size).unwrap_or(1);
        let conv_config = nn::ConvConfig {
            stride: 2,
            padding: 1,
            bias: false,
            ..Default::default()
        };

        let mut filters = config.base_filters;
        let input = nn::conv2d(vs / "input", config.channels, filters, 4, conv_config);

        let mut blocks = Vec::with_capacity(layers - 1);
        for i in 1..layers {
            let conv = nn::conv2d(vs / format!("conv{i}"), filters, filters * 2, 4, conv_config);
            let bn = nn::batch_norm2d(vs / format!("bn{i}"), filters * 2, Default::default());
            blocks.push((conv, bn));
            filters *= 2;
        }

        let flat = filters * 4 * 4;
        let source_head = nn::linear(vs / "source", flat, 1, Default::default());
        let class_head = nn::linear(vs / "class", flat, config.num_classes, Default::default());

        Self {
            config,
            input,
            blocks,
            source_head,
            class_head,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape (batch_size, channels, image_size, image_size)
    /// * `train` - Whether in training mode (affects batch norm and dropout)
    pub fn forward_t(&self, input: &Tensor, train: bool) -> DiscriminatorOutput {
        let slope = 0.2;
        let x = leaky_relu(&self.input.forward(input), slope).dropout(self.config.dropout, train);

        let x = self.blocks.iter().fold(x, |x, (conv, bn)| {
            let x = bn.forward_t(&conv.forward(&x), train);
            leaky_relu(&x, slope).dropout(self.config.dropout, train)
        });

        let batch_size = x.size()[0];
        let features = x.view([batch_size, -1]);

        DiscriminatorOutput {
            source_logits: self.source_head.forward(&features).view([batch_size]),
            class_log_probs: self.class_head.forward(&features).log_softmax(-1, Kind::Float),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}

fn leaky_relu(x: &Tensor, slope: f64) -> Tensor {
    x.maximum(&(x * slope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    fn config(image_size: i64) -> DiscriminatorConfig {
        DiscriminatorConfig {
            image_size,
            channels: 3,
            base_filters: 8,
            num_classes: 5,
            dropout: 0.0,
        }
    }

    #[test]
    fn test_discriminator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), config(32));

        let input = Tensor::randn([4, 3, 32, 32], (Kind::Float, Device::Cpu));
        let out = disc.forward_t(&input, false);

        assert_eq!(out.source_logits.size(), vec![4]);
        assert_eq!(out.class_log_probs.size(), vec![4, 5]);
    }

    #[test]
    fn test_class_head_is_normalized() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), config(8));

        let input = Tensor::randn([2, 3, 8, 8], (Kind::Float, Device::Cpu));
        let out = disc.forward_t(&input, false);
        let total = out
            .class_log_probs
            .exp()
            .sum_dim_intlist([-1i64].as_slice(), false, Kind::Float);
        for v in Vec::<f32>::try_from(&total).unwrap() {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
