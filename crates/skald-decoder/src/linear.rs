//! An affine projection layer with an optional fused activation.
//!
//! Weights follow the `[OutFeatures, InFeatures]` layout convention, so the
//! forward pass computes `y = x @ W^T + b`. The weight matrix is held behind
//! an `Arc` so that two layers can alias one tensor (tied embeddings).

use std::sync::Arc;

use anyhow::{ensure, Result};
use ndarray::{Array1, Array2, ArrayView2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::activations::{apply_activation_2d, Activation};

/// A linear transformation `y = activ(x W^T + b)`.
pub struct Linear {
    weight: Arc<Array2<f32>>,
    bias: Option<Array1<f32>>,
    activation: Activation,
}

impl Linear {
    /// Creates a layer from an owned weight matrix in `[out, in]` layout.
    pub fn new(
        weight: Array2<f32>,
        bias: impl Into<Option<Array1<f32>>>,
        activation: Activation,
    ) -> Self {
        Self {
            weight: Arc::new(weight),
            bias: bias.into(),
            activation,
        }
    }

    /// Creates a layer that aliases an existing weight tensor.
    ///
    /// Used for tied embedding models: the output projection shares the
    /// embedding table's allocation instead of copying it.
    pub fn from_shared(
        weight: Arc<Array2<f32>>,
        bias: impl Into<Option<Array1<f32>>>,
        activation: Activation,
    ) -> Self {
        Self {
            weight,
            bias: bias.into(),
            activation,
        }
    }

    /// Creates a layer with Xavier-uniform weights and a zero bias.
    pub fn xavier<R: Rng>(
        out_features: usize,
        in_features: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let bound = (6.0 / (in_features + out_features) as f32).sqrt();
        let weight =
            Array2::random_using((out_features, in_features), Uniform::new(-bound, bound), rng);
        Self {
            weight: Arc::new(weight),
            bias: Some(Array1::zeros(out_features)),
            activation,
        }
    }

    /// Drops the bias vector.
    pub fn without_bias(mut self) -> Self {
        self.bias = None;
        self
    }

    /// Computes `activ(x @ W^T + b)`.
    pub fn forward(&self, input: &ArrayView2<f32>) -> Result<Array2<f32>> {
        ensure!(
            input.ncols() == self.in_features(),
            "linear layer expects {} input features, got {}",
            self.in_features(),
            input.ncols()
        );

        let mut result = input.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            result.outer_iter_mut().for_each(|mut row| row += b);
        }
        apply_activation_2d(&mut result, self.activation);
        Ok(result)
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    /// The shared weight tensor.
    pub fn weight(&self) -> &Arc<Array2<f32>> {
        &self.weight
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }
}

/// Creates a `Linear` from a weight matrix with no bias and no activation.
impl From<Array2<f32>> for Linear {
    fn from(weight: Array2<f32>) -> Self {
        Linear::new(weight, None, Activation::Linear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_forward_affine() {
        // weight: [out=2, in=3]
        let w = array![[1.0f32, 0.0, -1.0], [0.5, 0.5, 0.5]];
        let b = array![1.0f32, -1.0];
        let layer = Linear::new(w, b, Activation::Linear);

        let x = array![[2.0f32, 3.0, 4.0]];
        let y = layer.forward(&x.view()).unwrap();

        assert_eq!(y.shape(), &[1, 2]);
        assert_relative_eq!(y[[0, 0]], 2.0 - 4.0 + 1.0);
        assert_relative_eq!(y[[0, 1]], 0.5 * 9.0 - 1.0);
    }

    #[test]
    fn test_forward_with_activation() {
        let w = array![[100.0f32]];
        let layer = Linear::new(w, None, Activation::Sigmoid);
        let y = layer.forward(&array![[1.0f32]].view()).unwrap();
        assert_relative_eq!(y[[0, 0]], 1.0);
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let layer = Linear::new(array![[1.0f32, 2.0]], None, Activation::Linear);
        let err = layer.forward(&array![[1.0f32, 2.0, 3.0]].view());
        assert!(err.is_err());
    }

    #[test]
    fn test_shared_weight_aliases() {
        let shared = Arc::new(array![[1.0f32, 2.0], [3.0, 4.0]]);
        let a = Linear::from_shared(shared.clone(), None, Activation::Linear);
        let b = Linear::from_shared(shared.clone(), None, Activation::Linear);
        assert!(Arc::ptr_eq(a.weight(), b.weight()));
        assert!(Arc::ptr_eq(a.weight(), &shared));
    }

    #[test]
    fn test_xavier_shapes() {
        let mut rng = rand::thread_rng();
        let layer = Linear::xavier(4, 3, Activation::Tanh, &mut rng);
        assert_eq!(layer.out_features(), 4);
        assert_eq!(layer.in_features(), 3);
        assert!(layer.has_bias());
        assert!(!layer.without_bias().has_bias());
    }
}
