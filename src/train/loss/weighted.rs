//! Mixing of the adversarial and classification objectives

use crate::autograd::{add, scale, Tensor};
use crate::error::{Error, Result};

/// Coefficients of the adversarial and classification terms.
///
/// The classification coefficient is always `1 - discriminator_coefficient`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    discriminator_coefficient: f32,
}

impl LossWeights {
    pub fn new(discriminator_coefficient: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&discriminator_coefficient) {
            return Err(Error::Config(format!(
                "discriminator_coefficient must lie in [0, 1], got {discriminator_coefficient}"
            )));
        }
        Ok(Self { discriminator_coefficient })
    }

    pub fn discriminator_coefficient(&self) -> f32 {
        self.discriminator_coefficient
    }

    pub fn classifier_coefficient(&self) -> f32 {
        1.0 - self.discriminator_coefficient
    }

    /// `d * adversarial + (1 - d) * classification` (same shapes)
    pub fn mix(&self, adversarial: &Tensor, classification: &Tensor) -> Tensor {
        add(
            &scale(adversarial, self.discriminator_coefficient),
            &scale(classification, self.classifier_coefficient()),
        )
    }
}

impl Default for LossWeights {
    fn default() -> Self {
        Self { discriminator_coefficient: 0.5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_coefficients_sum_to_one() {
        let w = LossWeights::new(0.3).unwrap();
        assert_abs_diff_eq!(w.classifier_coefficient(), 0.7);
        let mixed = w.mix(&Tensor::constant(10.0), &Tensor::constant(1.0));
        assert_abs_diff_eq!(mixed.item(), 3.7, epsilon = 1e-6);
    }

    #[test]
    fn test_out_of_range_coefficient() {
        assert!(matches!(LossWeights::new(1.5), Err(Error::Config(_))));
        assert!(LossWeights::new(f32::NAN).is_err());
    }
}
