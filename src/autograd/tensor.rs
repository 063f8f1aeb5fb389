//! Tensor type with gradient tracking

use crate::autograd::BackwardOp;
use crate::error::{Error, Result};
use ndarray::Array1;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared gradient storage of a graph node
pub type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// N-dimensional `f32` tensor stored row-major in a flat buffer.
///
/// Clones are cheap handles: they share the value buffer (copy-on-write
/// through [`Tensor::data_mut`]) and the gradient cell, so a parameter cloned
/// into several branches of a graph accumulates every branch's gradient.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<Array1<f32>>,
    shape: Vec<usize>,
    grad: GradCell,
    backward_op: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a 1-D tensor from an array
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        let shape = vec![data.len()];
        Self::from_array(data, shape, requires_grad)
    }

    /// Create a tensor with an explicit shape.
    ///
    /// Panics if the shape does not cover the buffer exactly; callers with
    /// untrusted shapes go through [`Tensor::from_shape_vec`].
    pub fn from_array(data: Array1<f32>, shape: Vec<usize>, requires_grad: bool) -> Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {shape:?} does not match buffer of {} elements",
            data.len()
        );
        Self {
            data: Rc::new(data),
            shape,
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
        }
    }

    /// Create a 1-D tensor from a vector
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from(data), requires_grad)
    }

    /// Create a tensor from a vector and a shape, validating the element count
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>, requires_grad: bool) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::shape(shape, &[data.len()]));
        }
        Ok(Self::from_array(Array1::from(data), shape.to_vec(), requires_grad))
    }

    /// 1-D tensor of zeros
    pub fn zeros(len: usize, requires_grad: bool) -> Self {
        Self::new(Array1::zeros(len), requires_grad)
    }

    /// Tensor of zeros with the given shape
    pub fn zeros_shaped(shape: &[usize], requires_grad: bool) -> Self {
        let len: usize = shape.iter().product();
        Self::from_array(Array1::zeros(len), shape.to_vec(), requires_grad)
    }

    /// Tensor of ones with the given shape
    pub fn ones_shaped(shape: &[usize], requires_grad: bool) -> Self {
        let len: usize = shape.iter().product();
        Self::from_array(Array1::ones(len), shape.to_vec(), requires_grad)
    }

    /// Non-differentiable scalar
    pub fn constant(value: f32) -> Self {
        Self::from_vec(vec![value], false)
    }

    /// Flat view of the values
    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    /// Mutable flat view of the values (copies the buffer if it is shared)
    pub fn data_mut(&mut self) -> &mut Array1<f32> {
        Rc::make_mut(&mut self.data)
    }

    /// Contiguous slice of the values
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice().expect("tensor storage is contiguous")
    }

    /// Dimensions, outermost first
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First element; the value of a scalar tensor
    pub fn item(&self) -> f32 {
        self.data[0]
    }

    /// Whether gradients flow into this tensor
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Snapshot of the accumulated gradient
    pub fn grad(&self) -> Option<Array1<f32>> {
        self.grad.borrow().clone()
    }

    /// Overwrite the gradient
    pub fn set_grad(&self, grad: Array1<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add to the gradient, initialising it on first use
    pub fn accumulate_grad(&self, grad: Array1<f32>) {
        let mut cell = self.grad.borrow_mut();
        match cell.as_mut() {
            Some(existing) => *existing += &grad,
            None => *cell = Some(grad),
        }
    }

    /// Clear the gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Shared gradient cell, captured by backward ops producing this tensor
    pub fn grad_cell(&self) -> GradCell {
        Rc::clone(&self.grad)
    }

    /// Backward op that produced this tensor, if any
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Attach the op that propagates this tensor's gradient to its inputs
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    /// Same values, no graph history, no gradient
    pub fn detach(&self) -> Self {
        Self {
            data: Rc::clone(&self.data),
            shape: self.shape.clone(),
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad: false,
        }
    }

    /// Node identity, shared by all clones of this tensor
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.grad) as *const () as usize
    }

    /// Same buffer and graph node under a different shape.
    ///
    /// Used by shape ops that build their own backward op on top.
    pub(crate) fn with_shape_unchecked(&self, shape: Vec<usize>, requires_grad: bool) -> Self {
        Self {
            data: Rc::clone(&self.data),
            shape,
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.borrow().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shape_vec_rejects_bad_count() {
        let err = Tensor::from_shape_vec(&[2, 3], vec![0.0; 5], false).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_clone_shares_grad() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let b = a.clone();
        b.accumulate_grad(ndarray::arr1(&[1.0, 1.0]));
        assert_eq!(a.grad().unwrap()[1], 1.0);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_data_mut_copies_on_write() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let mut b = a.clone();
        b.data_mut()[0] = 5.0;
        assert_eq!(a.data()[0], 1.0);
        assert_eq!(b.data()[0], 5.0);
    }

    #[test]
    fn test_detach_drops_history() {
        let a = Tensor::from_vec(vec![1.0], true);
        let d = a.detach();
        assert!(!d.requires_grad());
        assert_ne!(a.id(), d.id());
    }
}
