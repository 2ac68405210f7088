//! Construction-time error types.

use thiserror::Error;

/// Errors raised while validating a decoder configuration.
///
/// These fire at construction, never at first use: a decoder that builds
/// successfully has a fully valid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A structural dimension was zero.
    #[error("{0} must be greater than zero")]
    ZeroDimension(&'static str),

    /// Dropout outside the half-open unit interval.
    #[error("dropout rate must be in [0, 1), got {0}")]
    DropoutRange(f32),

    /// Non-positive attention temperature.
    #[error("attention temperature must be positive, got {0}")]
    Temperature(f32),

    /// An enum-valued option failed to parse.
    #[error("invalid {field}: {reason}")]
    InvalidOption {
        field: &'static str,
        reason: String,
    },
}
