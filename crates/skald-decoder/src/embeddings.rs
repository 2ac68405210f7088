//! Target-side token embedding table.
//!
//! Index 0 is reserved as the padding sentinel: its row is zeroed at
//! construction and stays zero through lookups. The table is held behind an
//! `Arc` so the output projection of a tied-embedding decoder can alias it.

use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::{s, Array2, Array3, ArrayView2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Token index reserved for padding; excluded from loss and embedded as zero.
pub const PAD_TOKEN: u32 = 0;

pub struct Embedding {
    weights: Arc<Array2<f32>>,
    max_norm: Option<f32>,
}

impl Embedding {
    /// Creates an embedding table from a `[n_vocab, dim]` weight matrix.
    ///
    /// The padding row is forced to zero.
    pub fn new(mut weights: Array2<f32>, max_norm: Option<f32>) -> Self {
        weights.row_mut(PAD_TOKEN as usize).fill(0.0);
        Self {
            weights: Arc::new(weights),
            max_norm,
        }
    }

    /// Creates a table with unit-normal entries and a zeroed padding row.
    pub fn random<R: Rng>(n_vocab: usize, dim: usize, max_norm: Option<f32>, rng: &mut R) -> Self {
        let weights = Array2::random_using((n_vocab, dim), Normal::new(0.0, 1.0).unwrap(), rng);
        Self::new(weights, max_norm)
    }

    pub fn n_vocab(&self) -> usize {
        self.weights.nrows()
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }

    /// The shared weight tensor, for tying with an output projection.
    pub fn weights(&self) -> &Arc<Array2<f32>> {
        &self.weights
    }

    /// Embeds a `[batch, steps]` index matrix into `[batch, steps, dim]`.
    pub fn lookup(&self, tokens: &ArrayView2<u32>) -> Result<Array3<f32>> {
        let (batch, steps) = tokens.dim();
        let mut out = Array3::<f32>::zeros((batch, steps, self.dim()));

        for b in 0..batch {
            for t in 0..steps {
                let token = tokens[[b, t]];
                if token as usize >= self.n_vocab() {
                    bail!(
                        "token index {} out of range for vocabulary of {}",
                        token,
                        self.n_vocab()
                    );
                }
                let mut dst = out.slice_mut(s![b, t, ..]);
                dst.assign(&self.weights.row(token as usize));
                if let Some(max_norm) = self.max_norm {
                    let norm = dst.iter().map(|x| x * x).sum::<f32>().sqrt();
                    if norm > max_norm {
                        dst.mapv_inplace(|x| x * max_norm / norm);
                    }
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_padding_row_is_zero() {
        let emb = Embedding::new(array![[9.0f32, 9.0], [1.0, 2.0]], None);
        let out = emb.lookup(&array![[0u32, 1]].view()).unwrap();
        assert_eq!(out.slice(s![0, 0, ..]).sum(), 0.0);
        assert_relative_eq!(out[[0, 1, 0]], 1.0);
        assert_relative_eq!(out[[0, 1, 1]], 2.0);
    }

    #[test]
    fn test_out_of_range_token_fails() {
        let emb = Embedding::new(array![[0.0f32, 0.0], [1.0, 2.0]], None);
        assert!(emb.lookup(&array![[2u32]].view()).is_err());
    }

    #[test]
    fn test_max_norm_renormalizes() {
        let emb = Embedding::new(array![[0.0f32, 0.0], [3.0, 4.0]], Some(1.0));
        let out = emb.lookup(&array![[1u32]].view()).unwrap();
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-6);
        // Direction preserved.
        assert_relative_eq!(out[[0, 0, 0]], 0.6, epsilon = 1e-6);
        assert_relative_eq!(out[[0, 0, 1]], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_random_table_shape() {
        let mut rng = rand::thread_rng();
        let emb = Embedding::random(10, 4, None, &mut rng);
        assert_eq!(emb.n_vocab(), 10);
        assert_eq!(emb.dim(), 4);
        assert_eq!(emb.weights().row(0).sum(), 0.0);
    }
}
