//! Embedding lookup

use super::shape::gather;
use crate::autograd::Tensor;
use crate::error::{Error, Result};

/// Rows of `table [num_embeddings, dim]` selected by `ids`, shaped `[ids.len(), dim]`
pub fn embedding(table: &Tensor, ids: &[usize]) -> Result<Tensor> {
    if table.ndim() != 2 {
        return Err(Error::Config(format!(
            "embedding table must be [num_embeddings, dim], got {:?}",
            table.shape()
        )));
    }
    let (rows, dim) = (table.shape()[0], table.shape()[1]);
    if let Some(&bad) = ids.iter().find(|&&id| id >= rows) {
        return Err(Error::Config(format!("embedding id {bad} out of range for {rows} rows")));
    }

    let map = ids.iter().flat_map(|&id| (0..dim).map(move |c| id * dim + c)).collect();
    Ok(gather(table, map, vec![ids.len(), dim]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;

    #[test]
    fn test_lookup_and_scatter_gradient() {
        let table =
            Tensor::from_shape_vec(&[3, 2], vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0], true).unwrap();
        let mut out = embedding(&table, &[2, 0, 2]).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.data().to_vec(), vec![20.0, 21.0, 0.0, 1.0, 20.0, 21.0]);

        backward(&mut out, None);
        assert_eq!(table.grad().unwrap().to_vec(), vec![1.0, 1.0, 0.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn test_out_of_range_id() {
        let table = Tensor::zeros_shaped(&[3, 2], false);
        assert!(matches!(embedding(&table, &[3]), Err(Error::Config(_))));
    }
}
