//! Step-wise attentive decoding core for sequence generators.
//!
//! This crate provides the per-step transition function of a
//! show-attend-and-tell style decoder: an attention layer re-weights source
//! annotations against the current recurrent state, a GRU or LSTM cell
//! advances the state, and a stack of optional output shortcuts shapes the
//! next-token distribution. A teacher-forced driver unrolls the step over a
//! target sequence for loss computation and scoring.

pub mod activations;
pub mod attention;
pub mod context;
pub mod decoder;
pub mod dropout;
pub mod embeddings;
pub mod error;
pub mod linear;
pub mod loss;
pub mod rnn;

// Re-export commonly used items
pub use crate::{
    activations::Activation,
    attention::{Attention, AttentionConfig, Bottleneck, ScoreFunction},
    context::{Annotations, ContextBundle},
    decoder::{AttentionDecoder, DecoderConfig, DecoderOutput, InitStrategy, Mode, StepOutput},
    dropout::Dropout,
    embeddings::{Embedding, PAD_TOKEN},
    error::ConfigError,
    linear::Linear,
    rnn::{CellState, CellType, RnnCell},
};

// Prelude for easy imports
pub mod prelude {
    pub use crate::context::{Annotations, ContextBundle};
    pub use crate::decoder::{AttentionDecoder, DecoderConfig, Mode};
    pub use crate::rnn::CellType;
}
