//! Activation functions and softmax operations.

use std::str::FromStr;

use libm::{expf, tanhf};
use ndarray::{parallel::prelude::*, Array2, ArrayViewMut1, ArrayViewMut2};
use serde::{Deserialize, Serialize};

/// Minimum array size for parallel execution.
pub const PARALLEL_THRESHOLD: usize = 16_384;

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[serde(alias = "tanh")]
    Tanh,
    #[serde(alias = "sigmoid")]
    Sigmoid,
    /// Identity, i.e. a plain affine layer.
    #[serde(alias = "linear", alias = "none")]
    Linear,
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "linear" | "none" => Ok(Activation::Linear),
            _ => Err(format!("unknown activation function: {}", s)),
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Tanh
    }
}

#[inline(always)]
pub fn tanh_scalar(x: f32) -> f32 {
    tanhf(x)
}

#[inline(always)]
pub fn sigmoid_scalar(x: f32) -> f32 {
    if x <= -20.0 {
        0.0
    } else if x >= 20.0 {
        1.0
    } else {
        1.0 / (1.0 + expf(-x))
    }
}

fn apply_activation_slice(slice: &mut [f32], activation: Activation, use_parallel: bool) {
    match (activation, use_parallel) {
        (Activation::Tanh, true) => slice.par_iter_mut().for_each(|x| *x = tanh_scalar(*x)),
        (Activation::Tanh, false) => slice.iter_mut().for_each(|x| *x = tanh_scalar(*x)),
        (Activation::Sigmoid, true) => slice.par_iter_mut().for_each(|x| *x = sigmoid_scalar(*x)),
        (Activation::Sigmoid, false) => slice.iter_mut().for_each(|x| *x = sigmoid_scalar(*x)),
        (Activation::Linear, _) => {}
    }
}

/// Applies activation in-place to a 2D array.
pub fn apply_activation_2d(arr: &mut Array2<f32>, activation: Activation) {
    if activation == Activation::Linear {
        return;
    }
    let use_parallel = arr.len() >= PARALLEL_THRESHOLD;
    if let Some(slice) = arr.as_slice_mut() {
        apply_activation_slice(slice, activation, use_parallel);
    } else {
        match (activation, use_parallel) {
            (Activation::Tanh, true) => arr.par_mapv_inplace(tanh_scalar),
            (Activation::Tanh, false) => arr.mapv_inplace(tanh_scalar),
            (Activation::Sigmoid, true) => arr.par_mapv_inplace(sigmoid_scalar),
            (Activation::Sigmoid, false) => arr.mapv_inplace(sigmoid_scalar),
            (Activation::Linear, _) => {}
        }
    }
}

/// Applies activation in-place to a mutable 2D view.
pub fn apply_activation_2d_mut(arr: &mut ArrayViewMut2<f32>, activation: Activation) {
    if activation == Activation::Linear {
        return;
    }
    match activation {
        Activation::Tanh => arr.mapv_inplace(tanh_scalar),
        Activation::Sigmoid => arr.mapv_inplace(sigmoid_scalar),
        Activation::Linear => {}
    }
}

/// Applies softmax in-place to a slice.
pub fn softmax_inplace(slice: &mut [f32]) {
    if slice.is_empty() {
        return;
    }

    let max = slice.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

    let mut sum = 0.0;
    for v in slice.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }

    if sum > 0.0 {
        let scale = 1.0 / sum;
        for v in slice.iter_mut() {
            *v *= scale;
        }
    }
}

/// Applies softmax along the last axis of a 2D array, row by row.
pub fn softmax_rows_inplace(arr: &mut Array2<f32>) {
    for mut row in arr.rows_mut() {
        if let Some(slice) = row.as_slice_mut() {
            softmax_inplace(slice);
        } else {
            softmax_row_fallback(&mut row);
        }
    }
}

fn softmax_row_fallback(row: &mut ArrayViewMut1<f32>) {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    row.mapv_inplace(|x| (x - max).exp());
    let sum = row.sum();
    if sum > 0.0 {
        *row /= sum;
    }
}

/// Applies log-softmax along the last axis of a 2D array, row by row.
///
/// Max-shifted for numerical stability: `x - max - ln(sum(exp(x - max)))`.
pub fn log_softmax_rows_inplace(arr: &mut Array2<f32>) {
    for mut row in arr.rows_mut() {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mut sum = 0.0f32;
        for v in row.iter() {
            sum += (*v - max).exp();
        }
        let log_sum = sum.ln();
        row.mapv_inplace(|x| x - max - log_sum);
    }
}
