//! Step-wise attentive decoder.
//!
//! One decoder instance owns its embedding table, attention layer, recurrent
//! cell and output projections, and exposes three operations:
//!
//! - [`AttentionDecoder::init_state`] produces the initial packed state from
//!   the context bundle,
//! - [`AttentionDecoder::step`] advances one timestep, returning the
//!   next-token log-probabilities and the next packed state,
//! - [`AttentionDecoder::forward`] unrolls `step` over a teacher-forced
//!   target sequence, accumulating the summed negative log-likelihood.

pub mod config;

use anyhow::{anyhow, ensure, Result};
use log::debug;
use ndarray::{concatenate, s, Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use crate::activations::{apply_activation_2d, log_softmax_rows_inplace, Activation};
use crate::attention::Attention;
use crate::context::{Annotations, ContextBundle};
use crate::dropout::Dropout;
use crate::embeddings::{Embedding, PAD_TOKEN};
use crate::linear::Linear;
use crate::loss::masked_nll;
use crate::rnn::{CellState, RnnCell};

pub use config::{DecoderConfig, InitStrategy};

/// Whether a forward pass is part of training or evaluation.
///
/// Passed explicitly into every driver call; there is no ambient mode flag.
/// Training applies dropout and skips the per-step distribution buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Result of a single decoding step.
pub struct StepOutput {
    /// Log-probabilities over the vocabulary, `[batch, n_vocab]`.
    pub log_probs: Array2<f32>,
    /// Alignment weights over source positions, `[batch, positions]`.
    pub alignments: Array2<f32>,
    /// The next packed state handle.
    pub state: Array2<f32>,
}

/// Result of a teacher-forced pass.
pub struct DecoderOutput {
    /// Summed negative log-likelihood over all non-padding targets.
    pub loss: f32,
    /// Number of targets that contributed to the loss.
    pub n_tokens: usize,
    /// Per-step distributions `[batch, steps - 1, n_vocab]`; `None` when
    /// training.
    pub log_probs: Option<Array3<f32>>,
}

pub struct AttentionDecoder {
    config: DecoderConfig,
    embedding: Embedding,
    attention: Attention,
    cell: RnnCell,
    /// Mean-context initializer projection; absent for zero init.
    init_proj: Option<Linear>,
    /// Bottleneck from the hidden state to embedding width.
    hid2out: Linear,
    /// Final projection to vocabulary logits.
    out2prob: Linear,
    selector_proj: Option<Linear>,
    ctx2out_proj: Option<Linear>,
    dropout: Option<Dropout>,
}

impl AttentionDecoder {
    pub fn new<R: Rng>(config: DecoderConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let state_width = config.hidden_size * config.cell.n_states();

        let embedding =
            Embedding::random(config.n_vocab, config.input_size, config.emb_max_norm, rng);
        let attention = Attention::new(
            &config.attention,
            config.ctx_size,
            config.hidden_size,
            rng,
        )?;
        // The cell consumes the input embedding concatenated with the
        // attended context.
        let cell = RnnCell::random(
            config.cell,
            config.input_size + config.ctx_size,
            config.hidden_size,
            rng,
        );

        let init_proj = match config.init {
            InitStrategy::Zero => None,
            InitStrategy::MeanContext => Some(Linear::xavier(
                state_width,
                config.ctx_size,
                Activation::Tanh,
                rng,
            )),
        };

        let hid2out = Linear::xavier(
            config.input_size,
            config.hidden_size,
            Activation::Tanh,
            rng,
        );

        let out2prob = if config.tied_embeddings {
            Linear::from_shared(
                embedding.weights().clone(),
                Some(ndarray::Array1::zeros(config.n_vocab)),
                Activation::Linear,
            )
        } else {
            Linear::xavier(config.n_vocab, config.input_size, Activation::Linear, rng)
        };

        let ctx2out_proj = if config.ctx_to_output {
            Some(Linear::xavier(
                config.input_size,
                config.ctx_size,
                Activation::Linear,
                rng,
            ))
        } else {
            None
        };

        let selector_proj = if config.selector {
            Some(Linear::xavier(1, config.hidden_size, Activation::Sigmoid, rng))
        } else {
            None
        };

        let dropout = if config.dropout > 0.0 {
            Some(Dropout::new(config.dropout)?)
        } else {
            None
        };

        debug!(
            "built decoder: cell={:?} init={:?} vocab={} hidden={} ctx='{}'",
            config.cell, config.init, config.n_vocab, config.hidden_size, config.ctx_name
        );

        Ok(Self {
            config,
            embedding,
            attention,
            cell,
            init_proj,
            hid2out,
            out2prob,
            selector_proj,
            ctx2out_proj,
            dropout,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    /// The final vocabulary projection; aliases the embedding table when
    /// embeddings are tied.
    pub fn output_projection(&self) -> &Linear {
        &self.out2prob
    }

    fn annotations<'a>(&self, ctx: &'a ContextBundle) -> Result<&'a Annotations> {
        let annotations = ctx
            .get(&self.config.ctx_name)
            .ok_or_else(|| anyhow!("context bundle has no entry named '{}'", self.config.ctx_name))?;
        ensure!(
            annotations.width() == self.config.ctx_size,
            "annotations '{}' have width {}, decoder expects {}",
            self.config.ctx_name,
            annotations.width(),
            self.config.ctx_size
        );
        Ok(annotations)
    }

    /// Produces the initial packed state handle for a batch.
    pub fn init_state(&self, ctx: &ContextBundle, mode: Mode) -> Result<Array2<f32>> {
        let annotations = self.annotations(ctx)?;
        let batch = annotations.batch();
        let state_width = self.config.hidden_size * self.config.cell.n_states();

        match self.config.init {
            InitStrategy::Zero => Ok(Array2::zeros((batch, state_width))),
            InitStrategy::MeanContext => {
                let mut mean = mean_annotation(annotations);
                if mode == Mode::Train {
                    if let Some(dropout) = &self.dropout {
                        dropout.apply(&mut mean, &mut rand::thread_rng());
                    }
                }
                let proj = self
                    .init_proj
                    .as_ref()
                    .expect("mean-context init always builds a projection");
                proj.forward(&mean.view())
            }
        }
    }

    /// One decoding step: consumes the current packed state and the current
    /// input embedding, returns the next-token distribution and next state.
    pub fn step(
        &self,
        ctx: &ContextBundle,
        input: &Array2<f32>,
        state: &Array2<f32>,
        mode: Mode,
    ) -> Result<StepOutput> {
        let annotations = self.annotations(ctx)?;
        ensure!(
            input.nrows() == state.nrows(),
            "input batch {} does not match state batch {}",
            input.nrows(),
            state.nrows()
        );
        ensure!(
            input.ncols() == self.config.input_size,
            "input embedding width {} does not match input_size {}",
            input.ncols(),
            self.config.input_size
        );

        let previous = CellState::unpack(state, self.config.cell, self.config.hidden_size)?;

        // Only the primary state queries the annotations.
        let (alignments, mut context) = self.attention.forward(previous.primary(), annotations)?;

        if let Some(selector) = &self.selector_proj {
            // One scalar gate per batch element, broadcast over features.
            let gate = selector.forward(&previous.primary().view())?;
            context = context * &gate;
        }

        let combined = concatenate![Axis(1), input.view(), context.view()];
        let next = self.cell.step(&combined, &previous)?;

        let mut logit = if mode == Mode::Train && self.dropout.is_some() {
            let mut hidden = next.primary().clone();
            self.dropout
                .as_ref()
                .unwrap()
                .apply(&mut hidden, &mut rand::thread_rng());
            self.hid2out.forward(&hidden.view())?
        } else {
            self.hid2out.forward(&next.primary().view())?
        };

        if self.config.prev_to_output {
            logit += input;
        }
        if let Some(ctx2out) = &self.ctx2out_proj {
            logit += &ctx2out.forward(&context.view())?;
        }

        apply_activation_2d(&mut logit, Activation::Tanh);
        let mut log_probs = self.out2prob.forward(&logit.view())?;
        log_softmax_rows_inplace(&mut log_probs);

        Ok(StepOutput {
            log_probs,
            alignments,
            state: next.pack(),
        })
    }

    /// Teacher-forced unroll over a `[batch, steps]` target matrix.
    ///
    /// Column 0 holds the start-of-sequence sentinel; columns `1..` hold
    /// ground-truth tokens. The final column is never fed as input, so the
    /// pass performs `steps - 1` step invocations.
    pub fn forward(
        &self,
        ctx: &ContextBundle,
        targets: &ArrayView2<u32>,
        mode: Mode,
    ) -> Result<DecoderOutput> {
        let (batch, steps) = targets.dim();
        ensure!(
            steps >= 2,
            "teacher forcing needs at least 2 timesteps, got {}",
            steps
        );

        debug!("teacher forcing {} steps over batch {}", steps - 1, batch);

        let embedded = self.embedding.lookup(targets)?;
        let mut state = self.init_state(ctx, mode)?;

        let mut loss = 0.0f32;
        let mut n_tokens = 0usize;
        let mut log_probs = match mode {
            Mode::Train => None,
            Mode::Eval => Some(Array3::<f32>::zeros((
                batch,
                steps - 1,
                self.config.n_vocab,
            ))),
        };

        for t in 0..steps - 1 {
            let input = embedded.slice(s![.., t, ..]).to_owned();
            let output = self.step(ctx, &input, &state, mode)?;
            state = output.state;

            let (step_loss, step_tokens) =
                masked_nll(&output.log_probs, &targets.column(t + 1), PAD_TOKEN)?;
            loss += step_loss;
            n_tokens += step_tokens;

            if let Some(buffer) = &mut log_probs {
                buffer
                    .slice_mut(s![.., t, ..])
                    .assign(&output.log_probs);
            }
        }

        Ok(DecoderOutput {
            loss,
            n_tokens,
            log_probs,
        })
    }
}

/// Mean annotation over source positions, honoring the validity mask.
///
/// Positions marked invalid contribute nothing; a batch element with no
/// valid position falls back to a zero mean.
fn mean_annotation(annotations: &Annotations) -> Array2<f32> {
    let data = annotations.data();
    let (batch, _, width) = data.dim();
    match annotations.mask() {
        None => data
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array2::zeros((batch, width))),
        Some(mask) => {
            let mask_expanded = mask.view().insert_axis(Axis(2));
            let masked = data * &mask_expanded;
            let sum = masked.sum_axis(Axis(1));
            let count = mask.sum_axis(Axis(1)).insert_axis(Axis(1));
            let count_safe = count.mapv(|c| if c == 0.0 { 1.0 } else { c });
            sum / count_safe
        }
    }
}
