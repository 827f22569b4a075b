//! Loss functions for AC-GAN training
//!
//! Source loss is Binary Cross Entropy on the real/fake logits; class loss is
//! Negative Log Likelihood on the auxiliary head's log-probabilities.

use tch::{Kind, Reduction, Tensor};

/// Target for the source head on real samples
pub const REAL_LABEL: f64 = 1.0;
/// Target for the source head on generated samples
pub const FAKE_LABEL: f64 = 0.0;

/// Source loss: BCE between `logits` and a constant `target`
///
/// # Arguments
///
/// * `logits` - Discriminator source logits, shape (batch_size,)
/// * `target` - [`REAL_LABEL`] or [`FAKE_LABEL`]
///
/// # Returns
///
/// Scalar loss tensor
pub fn source_loss(logits: &Tensor, target: f64) -> Tensor {
    let targets = Tensor::full_like(logits, target);
    logits.binary_cross_entropy_with_logits::<Tensor>(&targets, None, None, Reduction::Mean)
}

/// Class loss: NLL of `labels` under `log_probs`
///
/// # Arguments
///
/// * `log_probs` - Class log-probabilities, shape (batch_size, num_classes)
/// * `labels` - int64 class indices, shape (batch_size,)
pub fn class_loss(log_probs: &Tensor, labels: &Tensor) -> Tensor {
    log_probs.g_nll_loss::<Tensor>(labels, None, Reduction::Mean, -100)
}

/// Source plus class loss for one discriminator forward pass
pub fn auxiliary_loss(logits: &Tensor, log_probs: &Tensor, target: f64, labels: &Tensor) -> Tensor {
    source_loss(logits, target) + class_loss(log_probs, labels)
}

/// Count of argmax predictions equal to `labels`
///
/// # Returns
///
/// (correct, total)
pub fn classification_accuracy(log_probs: &Tensor, labels: &Tensor) -> (i64, i64) {
    let predicted = log_probs.argmax(-1, false);
    let correct = predicted
        .eq_tensor(labels)
        .to_kind(Kind::Int64)
        .sum(Kind::Int64)
        .int64_value(&[]);
    (correct, labels.size()[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::Device;

    #[test]
    fn test_source_loss() {
        let logits = Tensor::randn([4], (Kind::Float, Device::Cpu));
        let loss = source_loss(&logits, REAL_LABEL);

        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(loss.double_value(&[]) > 0.0);
    }

    #[test]
    fn test_confident_discriminator() {
        let real = Tensor::full([4], 10.0, (Kind::Float, Device::Cpu));
        let fake = Tensor::full([4], -10.0, (Kind::Float, Device::Cpu));
        let loss = source_loss(&real, REAL_LABEL) + source_loss(&fake, FAKE_LABEL);

        assert!(loss.double_value(&[]) < 0.1);
    }

    #[test]
    fn test_class_loss_of_uniform_prediction() {
        let log_probs = Tensor::full([2, 4], (0.25f64).ln(), (Kind::Float, Device::Cpu));
        let labels = Tensor::from_slice(&[0i64, 3]);
        let loss = class_loss(&log_probs, &labels).double_value(&[]);

        assert_abs_diff_eq!(loss, 4f64.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_classification_accuracy() {
        let log_probs = Tensor::from_slice(&[0.0f32, -5.0, -5.0, 0.0, 0.0, -5.0])
            .view([3, 2]);
        let labels = Tensor::from_slice(&[0i64, 1, 1]);

        assert_eq!(classification_accuracy(&log_probs, &labels), (2, 3));
    }
}
