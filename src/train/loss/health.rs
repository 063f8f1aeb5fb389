//! Divergence reporting

/// Whether a loss value can still be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossHealth {
    Finite,
    Diverged,
}

/// Report a non-finite loss; training is expected to continue either way
pub fn check_finite(name: &str, value: f32) -> LossHealth {
    if value.is_finite() {
        LossHealth::Finite
    } else {
        tracing::warn!(loss = name, value = %value, "loss is not finite");
        LossHealth::Diverged
    }
}
