//! Per-step attention over source annotations.
//!
//! Scores every source position against a query derived from the decoder
//! state, masks invalid positions, normalizes with a softmax, and returns the
//! alignment weights together with the weighted sum of the raw annotations.

use std::str::FromStr;

use anyhow::{ensure, Result};
use ndarray::{s, Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::{apply_activation_2d, softmax_rows_inplace, Activation};
use crate::context::Annotations;
use crate::linear::Linear;

/// Large negative score for masked positions (avoids NaN in softmax).
pub const MASK_VALUE: f32 = -1e9;

/// How annotation/query pairs are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFunction {
    /// Additive scoring: `v . activ(W_c c + W_q q)`.
    Mlp,
    /// Multiplicative scoring: `(W_c c) . (W_q q)`.
    Dot,
}

impl FromStr for ScoreFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mlp" => Ok(ScoreFunction::Mlp),
            "dot" => Ok(ScoreFunction::Dot),
            _ => Err(format!("unknown attention score function: {}", s)),
        }
    }
}

/// Width of the shared space scores are computed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bottleneck {
    /// Use the annotation width.
    #[serde(alias = "ctx")]
    Context,
    /// Use the decoder hidden width.
    #[serde(alias = "hid")]
    Hidden,
}

impl FromStr for Bottleneck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ctx" | "context" => Ok(Bottleneck::Context),
            "hid" | "hidden" => Ok(Bottleneck::Hidden),
            _ => Err(format!("unknown attention bottleneck: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttentionConfig {
    pub score: ScoreFunction,
    pub activation: Activation,
    pub bottleneck: Bottleneck,
    /// Project annotations into the bottleneck space before scoring.
    pub transform_ctx: bool,
    /// Give the annotation projection a bias vector.
    pub mlp_bias: bool,
    /// Score divisor; sharpens (<1) or flattens (>1) the alignment.
    pub temperature: f32,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            score: ScoreFunction::Mlp,
            activation: Activation::Tanh,
            bottleneck: Bottleneck::Context,
            transform_ctx: true,
            mlp_bias: false,
            temperature: 1.0,
        }
    }
}

pub struct Attention {
    ctx_proj: Option<Linear>,
    query_proj: Linear,
    /// Score vector for MLP attention, `[mid]`.
    mlp: Option<Linear>,
    activation: Activation,
    temperature: f32,
    ctx_size: usize,
    query_size: usize,
}

impl Attention {
    pub fn new<R: Rng>(
        config: &AttentionConfig,
        ctx_size: usize,
        query_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        ensure!(
            config.temperature > 0.0,
            "attention temperature must be positive, got {}",
            config.temperature
        );

        let mid_size = match config.bottleneck {
            Bottleneck::Context => ctx_size,
            Bottleneck::Hidden => query_size,
        };
        ensure!(
            config.transform_ctx || mid_size == ctx_size,
            "attention without ctx transform requires a ctx-width bottleneck \
             ({} != {})",
            mid_size,
            ctx_size
        );

        let ctx_proj = if config.transform_ctx {
            let layer = Linear::xavier(mid_size, ctx_size, Activation::Linear, rng);
            Some(if config.mlp_bias {
                layer
            } else {
                layer.without_bias()
            })
        } else {
            None
        };

        let query_proj =
            Linear::xavier(mid_size, query_size, Activation::Linear, rng).without_bias();

        let mlp = match config.score {
            ScoreFunction::Mlp => {
                Some(Linear::xavier(1, mid_size, Activation::Linear, rng).without_bias())
            }
            ScoreFunction::Dot => None,
        };

        Ok(Self {
            ctx_proj,
            query_proj,
            mlp,
            activation: config.activation,
            temperature: config.temperature,
            ctx_size,
            query_size,
        })
    }

    /// Scores the query against every source position.
    ///
    /// Returns `(weights [batch, positions], context [batch, ctx_size])`,
    /// where `context` is the weighted sum of the raw annotations.
    pub fn forward(
        &self,
        query: &Array2<f32>,
        annotations: &Annotations,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let (batch, positions, width) = annotations.data().dim();
        ensure!(
            width == self.ctx_size,
            "annotation width {} does not match attention ctx size {}",
            width,
            self.ctx_size
        );
        ensure!(
            query.nrows() == batch,
            "query batch {} does not match annotation batch {}",
            query.nrows(),
            batch
        );
        ensure!(
            query.ncols() == self.query_size,
            "query width {} does not match attention query size {}",
            query.ncols(),
            self.query_size
        );

        let projected_query = self.query_proj.forward(&query.view())?;

        let mut scores = Array2::<f32>::zeros((batch, positions));
        for b in 0..batch {
            let ctx_b = annotations.data().slice(s![b, .., ..]);
            let ctx_b = match &self.ctx_proj {
                Some(proj) => proj.forward(&ctx_b)?,
                None => ctx_b.to_owned(),
            };

            match &self.mlp {
                Some(mlp) => {
                    // Additive: broadcast the query row over positions.
                    let mut combined = ctx_b;
                    combined += &projected_query.row(b);
                    apply_activation_2d(&mut combined, self.activation);
                    let v = mlp.weight().row(0);
                    scores.row_mut(b).assign(&combined.dot(&v));
                }
                None => {
                    scores.row_mut(b).assign(&ctx_b.dot(&projected_query.row(b)));
                }
            }
        }

        if self.temperature != 1.0 {
            scores.mapv_inplace(|x| x / self.temperature);
        }

        if let Some(mask) = annotations.mask() {
            scores.zip_mut_with(mask, |score, &valid| {
                if valid == 0.0 {
                    *score = MASK_VALUE;
                }
            });
        }

        softmax_rows_inplace(&mut scores);

        // Weighted sum of the raw (untransformed) annotations.
        let mut context = Array2::<f32>::zeros((batch, width));
        for b in 0..batch {
            let weighted: Array1<f32> = annotations
                .data()
                .slice(s![b, .., ..])
                .t()
                .dot(&scores.row(b));
            context.row_mut(b).assign(&weighted);
        }

        Ok((scores, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array3, Axis};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn weights_sum(weights: &Array2<f32>) -> Array1<f32> {
        weights.sum_axis(Axis(1))
    }

    fn attention(config: &AttentionConfig, ctx: usize, query: usize) -> Attention {
        let mut rng = StdRng::seed_from_u64(7);
        Attention::new(config, ctx, query, &mut rng).unwrap()
    }

    #[test]
    fn test_weights_are_a_distribution() {
        let att = attention(&AttentionConfig::default(), 3, 4);
        let ann = Annotations::unmasked(Array3::from_shape_fn((2, 5, 3), |(b, p, w)| {
            (b + p + w) as f32 * 0.1
        }));
        let query = Array2::from_elem((2, 4), 0.3);

        let (weights, context) = att.forward(&query, &ann).unwrap();
        assert_eq!(weights.dim(), (2, 5));
        assert_eq!(context.dim(), (2, 3));
        for sum in weights_sum(&weights) {
            assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_masked_positions_get_zero_weight() {
        let att = attention(&AttentionConfig::default(), 2, 3);
        let data = Array3::from_shape_fn((1, 4, 2), |(_, p, w)| (p * 2 + w) as f32);
        let mask = array![[1.0f32, 1.0, 0.0, 0.0]];
        let ann = Annotations::new(data, Some(mask)).unwrap();
        let query = Array2::from_elem((1, 3), 0.5);

        let (weights, _) = att.forward(&query, &ann).unwrap();
        assert_relative_eq!(weights[[0, 2]], 0.0, epsilon = 1e-6);
        assert_relative_eq!(weights[[0, 3]], 0.0, epsilon = 1e-6);
        assert_relative_eq!(weights.row(0).sum(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_context_is_weighted_annotation_sum() {
        // A single valid position forces all weight onto it, so the context
        // vector must equal that annotation exactly.
        let att = attention(&AttentionConfig::default(), 2, 3);
        let data = array![[[5.0f32, -1.0], [9.0, 9.0]]];
        let mask = array![[1.0f32, 0.0]];
        let ann = Annotations::new(data, Some(mask)).unwrap();
        let query = Array2::from_elem((1, 3), 0.1);

        let (_, context) = att.forward(&query, &ann).unwrap();
        assert_relative_eq!(context[[0, 0]], 5.0, epsilon = 1e-5);
        assert_relative_eq!(context[[0, 1]], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_dot_attention() {
        let config = AttentionConfig {
            score: ScoreFunction::Dot,
            ..AttentionConfig::default()
        };
        let att = attention(&config, 3, 3);
        let ann = Annotations::unmasked(Array3::from_shape_fn((1, 2, 3), |(_, p, w)| {
            (p + w) as f32
        }));
        let query = Array2::from_elem((1, 3), 1.0);

        let (weights, _) = att.forward(&query, &ann).unwrap();
        assert_relative_eq!(weights.row(0).sum(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_untransformed_ctx_requires_ctx_bottleneck() {
        let config = AttentionConfig {
            transform_ctx: false,
            bottleneck: Bottleneck::Hidden,
            ..AttentionConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert!(Attention::new(&config, 3, 4, &mut rng).is_err());
    }

    #[test]
    fn test_bad_temperature_fails() {
        let config = AttentionConfig {
            temperature: 0.0,
            ..AttentionConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert!(Attention::new(&config, 3, 4, &mut rng).is_err());
    }

    #[test]
    fn test_score_function_from_str() {
        assert_eq!(ScoreFunction::from_str("mlp").unwrap(), ScoreFunction::Mlp);
        assert_eq!(ScoreFunction::from_str("dot").unwrap(), ScoreFunction::Dot);
        assert!(ScoreFunction::from_str("bilinear").is_err());
        assert_eq!(Bottleneck::from_str("ctx").unwrap(), Bottleneck::Context);
        assert_eq!(Bottleneck::from_str("hid").unwrap(), Bottleneck::Hidden);
        assert!(Bottleneck::from_str("mid").is_err());
    }
}
