//! Basic autograd operations: add, sub, mul, scale, sums and means

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use std::rc::Rc;

fn assert_same_shape(op: &str, a: &Tensor, b: &Tensor) {
    assert_eq!(a.shape(), b.shape(), "{op}: operand shapes differ");
}

/// Add two tensors of the same shape
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    assert_same_shape("add", a, b);
    let data = a.data() + b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            sign_b: 1.0,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

/// Subtract `b` from `a`
pub fn sub(a: &Tensor, b: &Tensor) -> Tensor {
    assert_same_shape("sub", a, b);
    let data = a.data() - b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            sign_b: -1.0,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    sign_b: f32,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad * self.sign_b);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Multiply two tensors element-wise
pub fn mul(a: &Tensor, b: &Tensor) -> Tensor {
    assert_same_shape("mul", a, b);
    let data = a.data() * b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * b
                self.a.accumulate_grad(grad * self.b.data());
            }
            if self.b.requires_grad() {
                // ∂L/∂b = ∂L/∂out * a
                self.b.accumulate_grad(grad * self.a.data());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Scale tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * self.factor);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Add a scalar to every element
pub fn add_scalar(a: &Tensor, value: f32) -> Tensor {
    let data = a.data() + value;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        // d(a + c)/da = 1
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor: 1.0,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

/// Natural log of `max(a, floor)`; clipped elements get no gradient
pub fn log_clamped(a: &Tensor, floor: f32) -> Tensor {
    let data = a.data().mapv(|x| x.max(floor).ln());
    let requires_grad = a.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op =
            Rc::new(LogBackward { a: a.clone(), floor, result_grad: result.grad_cell() });
        result.set_backward_op(backward_op);
    }

    result
}

struct LogBackward {
    a: Tensor,
    floor: f32,
    result_grad: GradCell,
}

impl BackwardOp for LogBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂ln(x)/∂x = 1/x
                let floor = self.floor;
                let local = self.a.data().mapv(|x| if x > floor { 1.0 / x } else { 0.0 });
                self.a.accumulate_grad(grad * &local);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Sum all elements into a scalar
pub fn sum(a: &Tensor) -> Tensor {
    reduce_all(a, 1.0)
}

/// Mean of all elements as a scalar
pub fn mean(a: &Tensor) -> Tensor {
    reduce_all(a, 1.0 / a.len().max(1) as f32)
}

fn reduce_all(a: &Tensor, factor: f32) -> Tensor {
    let data = Array1::from(vec![a.data().sum() * factor]);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::from_array(data, vec![1], requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ReduceAllBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ReduceAllBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ReduceAllBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂sum * factor (broadcast)
                let grad_a = Array1::from_elem(self.a.len(), grad[0] * self.factor);
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Row-major strides of a shape
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// For every input element, the flat index of the output element it reduces into
fn reduction_map(shape: &[usize], axes: &[usize]) -> (Vec<usize>, usize) {
    let kept: Vec<usize> =
        shape.iter().enumerate().map(|(i, &d)| if axes.contains(&i) { 1 } else { d }).collect();
    let kept_strides = strides(&kept);
    // Reduced axes contribute nothing to the output index
    let out_strides: Vec<usize> = kept_strides
        .iter()
        .enumerate()
        .map(|(i, &s)| if axes.contains(&i) { 0 } else { s })
        .collect();

    let total: usize = shape.iter().product();
    let mut map = Vec::with_capacity(total);
    let mut index = vec![0usize; shape.len()];
    let mut out = 0usize;
    for _ in 0..total {
        map.push(out);
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            out += out_strides[axis];
            if index[axis] < shape[axis] {
                break;
            }
            out -= out_strides[axis] * index[axis];
            index[axis] = 0;
        }
    }
    (map, kept.iter().product())
}

/// Sum over the given axes.
///
/// With `keepdims` the reduced axes stay as size 1, otherwise they are removed.
pub fn sum_axes(a: &Tensor, axes: &[usize], keepdims: bool) -> Result<Tensor> {
    if let Some(&bad) = axes.iter().find(|&&axis| axis >= a.ndim()) {
        return Err(Error::Config(format!(
            "sum_axes: axis {bad} out of range for shape {:?}",
            a.shape()
        )));
    }

    let (map, out_len) = reduction_map(a.shape(), axes);
    let mut data = Array1::zeros(out_len);
    for (&value, &target) in a.data().iter().zip(&map) {
        data[target] += value;
    }

    let shape: Vec<usize> = a
        .shape()
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| match (axes.contains(&i), keepdims) {
            (false, _) => Some(d),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect();

    let requires_grad = a.requires_grad();
    let mut result = Tensor::from_array(data, shape, requires_grad);

    if requires_grad {
        let backward_op =
            Rc::new(SumAxesBackward { a: a.clone(), map, result_grad: result.grad_cell() });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct SumAxesBackward {
    a: Tensor,
    map: Vec<usize>,
    result_grad: GradCell,
}

impl BackwardOp for SumAxesBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let grad_a = Array1::from_iter(self.map.iter().map(|&target| grad[target]));
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}
