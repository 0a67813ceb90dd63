//! Core traits and types shared across attention implementations.
//!
//! Kernels consume head-split projections in the GPT-2 orientation:
//!
//! * `q`: `[batch, heads, q_len, head_dim]`
//! * `k`: `[batch, heads, head_dim, k_len]` (keys are stored transposed)
//! * `v`: `[batch, heads, k_len, head_dim]`
//! * `mask`: `[q_len, k_len]` with `1.0` where attention is allowed
//!
//! The output mirrors the layout of `q` and the storage dtype of the policy.

pub mod config;
pub mod errors;

use candle_core::Tensor;
use layers::PrecisionPolicy;

pub use config::Config;
pub use errors::AttentionError;

/// Result of a masked attention evaluation.
#[derive(Debug, Clone)]
pub struct Attended {
    /// `[batch, heads, q_len, head_dim]` context vectors.
    pub output: Tensor,
    /// `[batch, heads, q_len, k_len]` softmax weights, in the compute dtype.
    pub weights: Tensor,
}

/// Unified interface for attention kernels.
pub trait Attention {
    /// Computes `softmax(mask(q · k)) · v` for one set of head-split projections.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Attended, AttentionError>;
}
