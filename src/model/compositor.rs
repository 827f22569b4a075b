//! Alpha compositing of generated foregrounds onto real backgrounds

use tch::Tensor;

use crate::error::{Error, Result};

/// Blend `alpha * foreground + (1 - alpha) * background`
///
/// * `foreground`, `background` - `[B, C, H, W]`
/// * `alpha` - `[B, 1, H, W]` (broadcast over channels) or `[B, C, H, W]`,
///   clamped to [0, 1]
///
/// Gradients flow into `foreground` (and `background`) unchanged.
pub fn composite(foreground: &Tensor, background: &Tensor, alpha: &Tensor) -> Result<Tensor> {
    let fg = foreground.size();
    let bg = background.size();
    let a = alpha.size();

    if fg.len() != 4 {
        return Err(Error::ShapeMismatchError(format!(
            "foreground must be [B, C, H, W], got {fg:?}"
        )));
    }
    if fg != bg {
        return Err(Error::mismatch("background vs foreground", &fg, &bg));
    }
    let alpha_ok = a.len() == 4
        && a[0] == fg[0]
        && (a[1] == 1 || a[1] == fg[1])
        && a[2] == fg[2]
        && a[3] == fg[3];
    if !alpha_ok {
        return Err(Error::mismatch("alpha vs foreground", &[fg[0], 1, fg[2], fg[3]], &a));
    }

    let alpha = alpha.clamp(0.0, 1.0);
    let inverse = Tensor::ones_like(&alpha) - &alpha;
    Ok(&alpha * foreground + &inverse * background)
}

/// Map a matte from the symmetric [-1, 1] range into [0, 1]
pub fn unit_matte(matte: &Tensor) -> Tensor {
    (matte + 1.0) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn rand(shape: &[i64]) -> Tensor {
        Tensor::randn(shape, (Kind::Float, Device::Cpu))
    }

    #[test]
    fn test_opaque_alpha_returns_foreground() {
        let fg = rand(&[2, 3, 8, 8]);
        let bg = rand(&[2, 3, 8, 8]);
        let alpha = Tensor::ones([2, 1, 8, 8], (Kind::Float, Device::Cpu));
        let out = composite(&fg, &bg, &alpha).unwrap();
        assert!(out.equal(&fg));
    }

    #[test]
    fn test_transparent_alpha_returns_background() {
        let fg = rand(&[2, 3, 8, 8]);
        let bg = rand(&[2, 3, 8, 8]);
        let alpha = Tensor::zeros([2, 1, 8, 8], (Kind::Float, Device::Cpu));
        let out = composite(&fg, &bg, &alpha).unwrap();
        assert!(out.equal(&bg));
    }

    #[test]
    fn test_half_alpha_averages() {
        let fg = Tensor::ones([1, 3, 4, 4], (Kind::Float, Device::Cpu));
        let bg = Tensor::zeros([1, 3, 4, 4], (Kind::Float, Device::Cpu));
        let alpha = Tensor::full([1, 3, 4, 4], 0.5, (Kind::Float, Device::Cpu));
        let out = composite(&fg, &bg, &alpha).unwrap();
        let mean = out.mean(Kind::Float).double_value(&[]);
        assert!((mean - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let fg = rand(&[2, 3, 8, 8]);
        let bg = rand(&[2, 3, 16, 16]);
        let alpha = Tensor::ones([2, 1, 8, 8], (Kind::Float, Device::Cpu));
        assert!(matches!(
            composite(&fg, &bg, &alpha),
            Err(Error::ShapeMismatchError(_))
        ));

        let bad_alpha = Tensor::ones([2, 2, 8, 8], (Kind::Float, Device::Cpu));
        assert!(matches!(
            composite(&fg, &fg, &bad_alpha),
            Err(Error::ShapeMismatchError(_))
        ));
    }

    #[test]
    fn test_unit_matte() {
        let m = Tensor::from_slice(&[-1.0f32, 0.0, 1.0]);
        let u = unit_matte(&m);
        assert_eq!(Vec::<f32>::try_from(&u).unwrap(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_gradient_reaches_foreground() {
        let fg = rand(&[1, 3, 4, 4]).set_requires_grad(true);
        let bg = rand(&[1, 3, 4, 4]);
        let alpha = Tensor::full([1, 1, 4, 4], 0.25, (Kind::Float, Device::Cpu));
        let out = composite(&fg, &bg, &alpha).unwrap();
        out.sum(Kind::Float).backward();
        let grad = fg.grad().mean(Kind::Float).double_value(&[]);
        assert!((grad - 0.25).abs() < 1e-6);
    }
}
