//! Named parameter access shared by every layer and network

use crate::autograd::Tensor;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// A parameter-owning piece of a network.
///
/// Names are hierarchical and relative to the module, joined with `.`
/// (`pitch_time.deconv1.weight`). Non-trainable buffers such as batch-norm
/// running statistics are included in [`Module::named_parameters`] so they
/// are checkpointed, but have `requires_grad == false` and are skipped by
/// [`Module::parameters`].
pub trait Module {
    /// Every tensor the module owns, trainable or not
    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    /// Mutable access to every tensor the module owns, in the same order
    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    /// Trainable parameters
    fn parameters(&self) -> Vec<&Tensor> {
        self.named_parameters()
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| t.requires_grad())
            .collect()
    }

    /// Trainable parameters as mutable references for an optimizer
    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.named_parameters_mut()
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| t.requires_grad())
            .collect()
    }

    /// Number of trainable scalars
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|t| t.len()).sum()
    }

    /// Clear every parameter gradient
    fn zero_grad(&self) {
        for (_, t) in self.named_parameters() {
            t.zero_grad();
        }
    }

    /// Replace every tensor with the entry of the same name in `params`.
    ///
    /// Fails without modifying anything if a name is missing or a shape differs.
    fn load_parameters(&mut self, params: &HashMap<String, Tensor>) -> Result<()> {
        for (name, current) in self.named_parameters() {
            let stored = params
                .get(&name)
                .ok_or_else(|| Error::Checkpoint(format!("missing tensor '{name}'")))?;
            if stored.shape() != current.shape() {
                return Err(Error::Checkpoint(format!(
                    "tensor '{name}' has shape {:?}, expected {:?}",
                    stored.shape(),
                    current.shape()
                )));
            }
        }
        for (name, slot) in self.named_parameters_mut() {
            if let Some(stored) = params.get(&name) {
                *slot = Tensor::from_array(
                    stored.data().clone(),
                    stored.shape().to_vec(),
                    slot.requires_grad(),
                );
            }
        }
        Ok(())
    }
}

/// Prefix every name with `scope.`
pub(crate) fn scoped<T>(scope: &str, items: Vec<(String, T)>) -> Vec<(String, T)> {
    items.into_iter().map(|(name, t)| (format!("{scope}.{name}"), t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        weight: Tensor,
        running: Tensor,
    }

    impl Module for Pair {
        fn named_parameters(&self) -> Vec<(String, &Tensor)> {
            vec![("weight".into(), &self.weight), ("running".into(), &self.running)]
        }

        fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
            vec![("weight".into(), &mut self.weight), ("running".into(), &mut self.running)]
        }
    }

    fn pair() -> Pair {
        Pair { weight: Tensor::zeros_shaped(&[2, 3], true), running: Tensor::zeros(3, false) }
    }

    #[test]
    fn test_trainable_filter_and_count() {
        let p = pair();
        assert_eq!(p.named_parameters().len(), 2);
        assert_eq!(p.parameters().len(), 1);
        assert_eq!(p.num_parameters(), 6);
    }

    #[test]
    fn test_scoped_names() {
        let p = pair();
        let names: Vec<String> =
            scoped("dense", p.named_parameters()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["dense.weight", "dense.running"]);
    }

    #[test]
    fn test_load_replaces_values_and_keeps_trainability() {
        let mut p = pair();
        let mut params = HashMap::new();
        params.insert("weight".to_string(), Tensor::ones_shaped(&[2, 3], false));
        params.insert("running".to_string(), Tensor::from_vec(vec![1.0, 2.0, 3.0], false));
        p.load_parameters(&params).unwrap();
        assert_eq!(p.weight.data().to_vec(), vec![1.0; 6]);
        assert!(p.weight.requires_grad());
        assert!(!p.running.requires_grad());
    }

    #[test]
    fn test_load_rejects_missing_and_misshapen() {
        let mut p = pair();
        let mut params = HashMap::new();
        params.insert("weight".to_string(), Tensor::ones_shaped(&[3, 2], false));
        params.insert("running".to_string(), Tensor::zeros(3, false));
        assert!(matches!(p.load_parameters(&params), Err(Error::Checkpoint(_))));
        assert_eq!(p.weight.data().to_vec(), vec![0.0; 6]);

        params.remove("running");
        assert!(matches!(p.load_parameters(&params), Err(Error::Checkpoint(_))));
    }
}
