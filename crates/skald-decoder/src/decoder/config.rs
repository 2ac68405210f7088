//! Decoder configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::attention::AttentionConfig;
use crate::error::ConfigError;
use crate::rnn::CellType;

/// How the initial recurrent state is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// All-zero state, independent of the annotations.
    Zero,
    /// Learned tanh projection of the (masked) mean annotation.
    MeanContext,
}

impl FromStr for InitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero" => Ok(InitStrategy::Zero),
            "mean_ctx" | "mean_context" => Ok(InitStrategy::MeanContext),
            _ => Err(format!("unknown decoder init strategy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Embedding width, also the width of the pre-output bottleneck.
    pub input_size: usize,
    pub hidden_size: usize,
    /// Which entry of the context bundle to attend over.
    pub ctx_name: String,
    /// Feature width of that entry's annotations.
    pub ctx_size: usize,
    pub n_vocab: usize,
    pub cell: CellType,
    pub init: InitStrategy,
    pub attention: AttentionConfig,
    /// Share one weight matrix between the embedding table and the final
    /// vocabulary projection.
    pub tied_embeddings: bool,
    pub dropout: f32,
    /// Scale the attended context by a learned per-step scalar gate.
    pub selector: bool,
    /// Add the raw input embedding into the pre-output logit.
    pub prev_to_output: bool,
    /// Add a projection of the attended context into the pre-output logit.
    pub ctx_to_output: bool,
    /// Renormalize embedding rows above this L2 norm at lookup.
    pub emb_max_norm: Option<f32>,
}

impl DecoderConfig {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        ctx_name: impl Into<String>,
        ctx_size: usize,
        n_vocab: usize,
    ) -> Self {
        Self {
            input_size,
            hidden_size,
            ctx_name: ctx_name.into(),
            ctx_size,
            n_vocab,
            cell: CellType::Gru,
            init: InitStrategy::Zero,
            attention: AttentionConfig::default(),
            tied_embeddings: false,
            dropout: 0.0,
            selector: false,
            prev_to_output: true,
            ctx_to_output: true,
            emb_max_norm: None,
        }
    }

    /// Fails fast on any invalid setting; a decoder is only ever built from
    /// a validated configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, field) in [
            (self.input_size, "input_size"),
            (self.hidden_size, "hidden_size"),
            (self.ctx_size, "ctx_size"),
            (self.n_vocab, "n_vocab"),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDimension(field));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::DropoutRange(self.dropout));
        }
        if self.attention.temperature <= 0.0 {
            return Err(ConfigError::Temperature(self.attention.temperature));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_strategy_from_str() {
        assert_eq!(InitStrategy::from_str("zero").unwrap(), InitStrategy::Zero);
        assert_eq!(
            InitStrategy::from_str("mean_ctx").unwrap(),
            InitStrategy::MeanContext
        );
        assert!(InitStrategy::from_str("random").is_err());
    }

    #[test]
    fn test_default_options() {
        let config = DecoderConfig::new(4, 8, "image", 6, 100);
        assert_eq!(config.cell, CellType::Gru);
        assert_eq!(config.init, InitStrategy::Zero);
        assert!(config.prev_to_output);
        assert!(config.ctx_to_output);
        assert!(!config.selector);
        assert!(!config.tied_embeddings);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DecoderConfig::new(4, 8, "image", 6, 100);
        config.n_vocab = 0;
        assert!(config.validate().is_err());

        let mut config = DecoderConfig::new(4, 8, "image", 6, 100);
        config.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = DecoderConfig::new(4, 8, "image", 6, 100);
        config.attention.temperature = -1.0;
        assert!(config.validate().is_err());
    }
}
