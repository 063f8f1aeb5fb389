//! Matrix multiplication and fully-connected autograd operations
//!
//! GEMM runs on the CPU, split over output rows with rayon.

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use rayon::prelude::*;
use std::rc::Rc;

/// Transpose a row-major matrix (rows x cols) to (cols x rows)
/// Uses cache-efficient blocked transpose for large matrices
#[inline]
pub fn transpose(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut transposed = vec![0.0f32; rows * cols];

    const BLOCK_SIZE: usize = 32;
    if rows >= BLOCK_SIZE && cols >= BLOCK_SIZE {
        transpose_blocked(data, &mut transposed, rows, cols, BLOCK_SIZE);
    } else {
        transpose_simple(data, &mut transposed, rows, cols);
    }

    transposed
}

#[inline]
fn transpose_blocked(src: &[f32], dst: &mut [f32], rows: usize, cols: usize, block: usize) {
    for r_block in (0..rows).step_by(block) {
        for c_block in (0..cols).step_by(block) {
            let r_end = (r_block + block).min(rows);
            let c_end = (c_block + block).min(cols);
            for r in r_block..r_end {
                for c in c_block..c_end {
                    dst[c * rows + r] = src[r * cols + c];
                }
            }
        }
    }
}

#[inline]
fn transpose_simple(src: &[f32], dst: &mut [f32], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

/// C = A @ B for row-major A (m×k) and B (k×n)
pub fn matmul_compute(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    if n == 0 {
        return c;
    }
    c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (p, &a_ip) in a[i * k..(i + 1) * k].iter().enumerate() {
            if a_ip == 0.0 {
                continue;
            }
            for (c_ij, &b_pj) in row.iter_mut().zip(&b[p * n..(p + 1) * n]) {
                *c_ij += a_ip * b_pj;
            }
        }
    });
    c
}

/// Matrix multiplication
///
/// Computes C = A @ B where:
/// - A is m×k (flattened to length m*k)
/// - B is k×n (flattened to length k*n)
/// - C is m×n
pub fn matmul(a: &Tensor, b: &Tensor, m: usize, k: usize, n: usize) -> Tensor {
    assert_eq!(a.len(), m * k, "Matrix A size mismatch");
    assert_eq!(b.len(), k * n, "Matrix B size mismatch");

    let result_data = matmul_compute(a.as_slice(), b.as_slice(), m, k, n);

    let requires_grad = a.requires_grad() || b.requires_grad();
    let mut result = Tensor::from_array(Array1::from(result_data), vec![m, n], requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MatmulBackward {
            a: a.clone(),
            b: b.clone(),
            m,
            k,
            n,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MatmulBackward {
    a: Tensor,
    b: Tensor,
    m: usize,
    k: usize,
    n: usize,
    result_grad: GradCell,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            // ∂L/∂A = ∂L/∂C @ B^T  (m×n) @ (n×k) = (m×k)
            // ∂L/∂B = A^T @ ∂L/∂C  (k×m) @ (m×n) = (k×n)
            let grad_c = grad_output.as_slice().expect("gradient output must be contiguous");

            if self.a.requires_grad() {
                let b_t = transpose(self.b.as_slice(), self.k, self.n);
                let grad_a = matmul_compute(grad_c, &b_t, self.m, self.n, self.k);
                self.a.accumulate_grad(Array1::from(grad_a));
            }

            if self.b.requires_grad() {
                let a_t = transpose(self.a.as_slice(), self.m, self.k);
                let grad_b = matmul_compute(&a_t, grad_c, self.k, self.m, self.n);
                self.b.accumulate_grad(Array1::from(grad_b));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Fully-connected layer: `x [rows, in] @ weight [in, out] + bias [out]`
pub fn linear(x: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let in_width = weight.shape().first().copied().unwrap_or(0);
    if x.ndim() != 2 || weight.ndim() != 2 || x.shape()[1] != in_width {
        let rows = x.shape().first().copied().unwrap_or(0);
        return Err(Error::shape(&[rows, in_width], x.shape()));
    }
    let (rows, inputs, outputs) = (x.shape()[0], weight.shape()[0], weight.shape()[1]);
    if bias.len() != outputs {
        return Err(Error::shape(&[outputs], bias.shape()));
    }

    let mut data = matmul_compute(x.as_slice(), weight.as_slice(), rows, inputs, outputs);
    if outputs > 0 {
        for row in data.chunks_mut(outputs) {
            for (v, &b) in row.iter_mut().zip(bias.as_slice()) {
                *v += b;
            }
        }
    }

    let requires_grad = x.requires_grad() || weight.requires_grad() || bias.requires_grad();
    let mut result = Tensor::from_array(Array1::from(data), vec![rows, outputs], requires_grad);

    if requires_grad {
        let backward_op = Rc::new(LinearBackward {
            matmul: MatmulBackward {
                a: x.clone(),
                b: weight.clone(),
                m: rows,
                k: inputs,
                n: outputs,
                result_grad: result.grad_cell(),
            },
            bias: bias.clone(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct LinearBackward {
    matmul: MatmulBackward,
    bias: Tensor,
}

impl BackwardOp for LinearBackward {
    fn backward(&self) {
        self.matmul.backward();
        if self.bias.requires_grad() {
            if let Some(grad) = self.matmul.result_grad.borrow().as_ref() {
                let mut grad_b = Array1::zeros(self.matmul.n);
                for row in grad.as_slice().expect("gradient is contiguous").chunks(self.matmul.n) {
                    grad_b += &ndarray::ArrayView1::from(row);
                }
                self.bias.accumulate_grad(grad_b);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        let mut inputs = self.matmul.inputs();
        inputs.push(self.bias.clone());
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;

    #[test]
    fn test_transpose_2x3() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = transpose(&data, 2, 3);
        assert_eq!(result, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_transpose_blocked_matches_simple() {
        let data: Vec<f32> = (0..40 * 33).map(|i| i as f32).collect();
        let mut simple = vec![0.0; data.len()];
        transpose_simple(&data, &mut simple, 40, 33);
        assert_eq!(transpose(&data, 40, 33), simple);
    }

    #[test]
    fn test_matmul_compute_2x2() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        assert_eq!(matmul_compute(&a, &b, 2, 2, 2), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_linear_adds_bias_per_row() {
        let x = Tensor::from_shape_vec(&[2, 2], vec![1.0, 0.0, 0.0, 1.0], false).unwrap();
        let w = Tensor::from_shape_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], false).unwrap();
        let b = Tensor::from_vec(vec![0.5, 0.5, 0.5], false);
        let y = linear(&x, &w, &b).unwrap();
        assert_eq!(y.shape(), &[2, 3]);
        assert_eq!(y.data().to_vec(), vec![1.5, 2.5, 3.5, 4.5, 5.5, 6.5]);
    }

    #[test]
    fn test_linear_bias_gradient_sums_rows() {
        let x = Tensor::from_shape_vec(&[3, 1], vec![1.0, 2.0, 3.0], true).unwrap();
        let w = Tensor::from_shape_vec(&[1, 2], vec![1.0, -1.0], true).unwrap();
        let b = Tensor::zeros(2, true);
        let mut y = linear(&x, &w, &b).unwrap();
        backward(&mut y, None);
        assert_eq!(b.grad().unwrap().to_vec(), vec![3.0, 3.0]);
        assert_eq!(w.grad().unwrap().to_vec(), vec![6.0, 6.0]);
        assert_eq!(x.grad().unwrap().to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_linear_rejects_width_mismatch() {
        let x = Tensor::zeros_shaped(&[2, 3], false);
        let w = Tensor::zeros_shaped(&[4, 1], false);
        let b = Tensor::zeros(1, false);
        assert!(matches!(linear(&x, &w, &b), Err(Error::ShapeMismatch { .. })));
    }
}
