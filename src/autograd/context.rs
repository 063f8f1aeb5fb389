//! Execution context for building computational graphs

use crate::autograd::{GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Per-graph state handed to every forward pass.
///
/// Carries the training/evaluation switch (batch-norm statistics), the
/// random source used by stochastic ops, and the per-example loss slots that
/// REINFORCE estimators are associated with.
pub struct Context {
    training: bool,
    rng: StdRng,
    losses: HashMap<String, GradCell>,
}

impl Context {
    /// Create a new context seeded from the OS
    pub fn new() -> Self {
        Self { training: true, rng: StdRng::from_os_rng(), losses: HashMap::new() }
    }

    /// Create a context with a fixed seed for reproducibility
    pub fn with_seed(seed: u64) -> Self {
        Self { training: true, rng: StdRng::seed_from_u64(seed), losses: HashMap::new() }
    }

    /// Set training mode
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Set evaluation mode
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Check if in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Random source for stochastic ops
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// `len` draws from U[0, 1)
    pub fn uniform(&mut self, len: usize) -> Array1<f32> {
        Array1::from_iter((0..len).map(|_| self.rng.random::<f32>()))
    }

    /// `len` draws from N(0, 1) (Box-Muller)
    pub fn normal(&mut self, len: usize) -> Array1<f32> {
        Array1::from_iter((0..len).map(|_| {
            let u1: f64 = self.rng.random::<f64>().max(1e-10);
            let u2: f64 = self.rng.random::<f64>();
            ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
        }))
    }

    /// Declare a per-example loss that estimators may be associated with.
    ///
    /// Registering an existing name clears its previous value.
    pub fn register_loss(&mut self, name: &str) {
        let slot =
            self.losses.entry(name.to_string()).or_insert_with(|| Rc::new(RefCell::new(None)));
        *slot.borrow_mut() = None;
    }

    /// Slot for a registered loss
    pub fn loss_slot(&self, name: &str) -> Result<GradCell> {
        self.losses.get(name).cloned().ok_or_else(|| {
            Error::Config(format!(
                "no per-example loss registered under '{name}'; call Context::register_loss first"
            ))
        })
    }

    /// Publish the per-example values of a registered loss
    pub fn provide_loss(&mut self, name: &str, per_example: &Tensor) -> Result<()> {
        let slot = self.loss_slot(name)?;
        *slot.borrow_mut() = Some(per_example.data().clone());
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
