//! Shape operations: reshape, permute, concatenation and slicing on the last axis

use super::basic::strides;
use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use std::rc::Rc;

/// View the same values under a new shape
pub fn reshape(a: &Tensor, shape: &[usize]) -> Result<Tensor> {
    if shape.iter().product::<usize>() != a.len() {
        return Err(Error::shape(shape, a.shape()));
    }
    let requires_grad = a.requires_grad();
    let mut result = a.with_shape_unchecked(shape.to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(PassBackward { a: a.clone(), result_grad: result.grad_cell() });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Gradient passes through unchanged (reshape)
struct PassBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for PassBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Reorder axes: output axis `i` is input axis `perm[i]`
pub fn permute(a: &Tensor, perm: &[usize]) -> Result<Tensor> {
    let ndim = a.ndim();
    let mut seen = vec![false; ndim];
    let valid = perm.len() == ndim
        && perm.iter().all(|&p| p < ndim && !std::mem::replace(&mut seen[p], true));
    if !valid {
        return Err(Error::Config(format!(
            "permute: {perm:?} is not a permutation of the axes of {:?}",
            a.shape()
        )));
    }

    let in_strides = strides(a.shape());
    let out_shape: Vec<usize> = perm.iter().map(|&p| a.shape()[p]).collect();
    let step: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();

    // Source index of every output element
    let total = a.len();
    let mut map = Vec::with_capacity(total);
    let mut index = vec![0usize; ndim];
    let mut src = 0usize;
    for _ in 0..total {
        map.push(src);
        for axis in (0..ndim).rev() {
            index[axis] += 1;
            src += step[axis];
            if index[axis] < out_shape[axis] {
                break;
            }
            src -= step[axis] * index[axis];
            index[axis] = 0;
        }
    }

    Ok(gather(a, map, out_shape))
}

/// Output element `j` is input element `map[j]`; repeated sources accumulate gradient
pub(crate) fn gather(a: &Tensor, map: Vec<usize>, shape: Vec<usize>) -> Tensor {
    let source = a.data();
    let data = Array1::from_iter(map.iter().map(|&i| source[i]));
    let requires_grad = a.requires_grad();
    let mut result = Tensor::from_array(data, shape, requires_grad);

    if requires_grad {
        let backward_op =
            Rc::new(GatherBackward { a: a.clone(), map, result_grad: result.grad_cell() });
        result.set_backward_op(backward_op);
    }

    result
}

/// Output element `j` was read from input element `map[j]`
struct GatherBackward {
    a: Tensor,
    map: Vec<usize>,
    result_grad: GradCell,
}

impl BackwardOp for GatherBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let mut grad_a = Array1::zeros(self.a.len());
                for (&src, &g) in self.map.iter().zip(grad.iter()) {
                    grad_a[src] += g;
                }
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Concatenate along the last axis; all leading dimensions must agree
pub fn concat_last(parts: &[Tensor]) -> Result<Tensor> {
    let first = parts.first().ok_or_else(|| Error::Config("concat of zero tensors".into()))?;
    let lead = &first.shape()[..first.ndim().saturating_sub(1)];
    for part in parts {
        if part.ndim() != first.ndim() || &part.shape()[..part.ndim() - 1] != lead {
            return Err(Error::shape(first.shape(), part.shape()));
        }
    }

    let widths: Vec<usize> = parts.iter().map(|p| p.shape()[p.ndim() - 1]).collect();
    let total_width: usize = widths.iter().sum();
    let rows: usize = lead.iter().product();

    let mut data = Vec::with_capacity(rows * total_width);
    for row in 0..rows {
        for (part, &w) in parts.iter().zip(&widths) {
            data.extend_from_slice(&part.as_slice()[row * w..(row + 1) * w]);
        }
    }

    let mut shape = lead.to_vec();
    shape.push(total_width);
    let requires_grad = parts.iter().any(Tensor::requires_grad);
    let mut result = Tensor::from_array(Array1::from(data), shape, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ConcatBackward {
            parts: parts.to_vec(),
            widths,
            rows,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct ConcatBackward {
    parts: Vec<Tensor>,
    widths: Vec<usize>,
    rows: usize,
    result_grad: GradCell,
}

impl BackwardOp for ConcatBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let grad = grad.as_slice().expect("gradient is contiguous");
            let total_width: usize = self.widths.iter().sum();
            let mut offset = 0;
            for (part, &w) in self.parts.iter().zip(&self.widths) {
                if part.requires_grad() {
                    let mut grad_part = Vec::with_capacity(self.rows * w);
                    for row in 0..self.rows {
                        let start = row * total_width + offset;
                        grad_part.extend_from_slice(&grad[start..start + w]);
                    }
                    part.accumulate_grad(Array1::from(grad_part));
                }
                offset += w;
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        self.parts.clone()
    }
}

/// Channels `start..start + len` of the last axis
pub fn slice_last(a: &Tensor, start: usize, len: usize) -> Result<Tensor> {
    let ndim = a.ndim();
    let width = a.shape().last().copied().unwrap_or(0);
    if ndim == 0 || start + len > width {
        return Err(Error::Config(format!(
            "slice_last: range {start}..{} outside last axis of {:?}",
            start + len,
            a.shape()
        )));
    }
    let rows = a.len() / width.max(1);
    let map = (0..rows).flat_map(|row| (0..len).map(move |c| row * width + start + c)).collect();

    let mut shape = a.shape().to_vec();
    shape[ndim - 1] = len;
    Ok(gather(a, map, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;

    #[test]
    fn test_permute_transposes_matrix() {
        let a = Tensor::from_shape_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], false).unwrap();
        let t = permute(&a, &[1, 0]).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.data().to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_permute_rejects_duplicates() {
        let a = Tensor::zeros_shaped(&[2, 3], false);
        assert!(permute(&a, &[0, 0]).is_err());
        assert!(permute(&a, &[0]).is_err());
    }

    #[test]
    fn test_concat_and_slice_roundtrip_gradients() {
        let a = Tensor::from_shape_vec(&[2, 1], vec![1.0, 2.0], true).unwrap();
        let b = Tensor::from_shape_vec(&[2, 2], vec![3.0, 4.0, 5.0, 6.0], true).unwrap();
        let c = concat_last(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.data().to_vec(), vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);

        let mut s = slice_last(&c, 1, 1).unwrap();
        assert_eq!(s.data().to_vec(), vec![3.0, 5.0]);

        backward(&mut s, None);
        assert!(a.grad().unwrap().iter().all(|&g| g == 0.0));
        assert_eq!(b.grad().unwrap().to_vec(), vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_concat_rejects_mismatched_rows() {
        let a = Tensor::zeros_shaped(&[2, 1], false);
        let b = Tensor::zeros_shaped(&[3, 1], false);
        assert!(matches!(concat_last(&[a, b]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_reshape_shares_gradient_path() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let mut r = reshape(&a, &[2, 2]).unwrap();
        assert!(reshape(&a, &[3, 2]).is_err());
        backward(&mut r, Some(ndarray::arr1(&[1.0, 2.0, 3.0, 4.0])));
        assert_eq!(a.grad().unwrap().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
