//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
///
/// Every variant is a precondition violation; none of them is recoverable.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The feature width cannot be split evenly across heads.
    #[error("hidden size {hidden_size} is not divisible by {num_heads} heads")]
    HeadsNotDivisible { hidden_size: usize, num_heads: usize },

    /// Any other construction-time configuration problem.
    #[error("invalid attention config: {0}")]
    InvalidConfig(String),

    /// The requested key window does not fit inside the causal mask.
    #[error("sequence length {requested} is out of bounds for a causal mask of size {max_seq_len}")]
    SequenceOutOfBounds { requested: usize, max_seq_len: usize },

    /// A cached prefix does not line up with the current projections.
    #[error("cache mismatch: {context}")]
    CacheMismatch { context: String },

    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape for {context}")]
    InvalidShape { context: String },

    /// A backend-specific failure propagated to the caller.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}
