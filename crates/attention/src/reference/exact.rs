//! Reference masked scaled dot-product attention.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait. Masked scores
//! are replaced by `score · mask − bias · (1 − mask)` with a large finite bias,
//! never `-inf`.

use candle_core::Tensor;
use candle_nn::ops::softmax_last_dim;
use layers::PrecisionPolicy;

use crate::core::{Attended, Attention, AttentionError};

/// Portable attention kernel for the GPT-2 key-transposed layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExactAttention {
    scale: bool,
    mask_bias: Option<f64>,
}

impl ExactAttention {
    /// Kernel that optionally scales scores by `1 / sqrt(head_dim)`.
    ///
    /// `mask_bias` overrides the bias derived from the precision policy.
    pub fn new(scale: bool, mask_bias: Option<f64>) -> Self {
        Self { scale, mask_bias }
    }

    pub fn scale(&self) -> bool {
        self.scale
    }

    /// Bias that will be subtracted from masked logits under `policy`.
    pub fn mask_bias(&self, policy: &PrecisionPolicy) -> f64 {
        self.mask_bias.unwrap_or_else(|| policy.mask_bias())
    }
}

impl Default for ExactAttention {
    fn default() -> Self {
        Self::new(true, None)
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Attended, AttentionError> {
        let (batch, heads, q_len, head_dim) =
            q.dims4().map_err(|_| AttentionError::InvalidShape {
                context: "q must have shape [batch, heads, q_len, head_dim]".to_string(),
            })?;
        let (kb, kh, kd, k_len) = k.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "k must have shape [batch, heads, head_dim, k_len]".to_string(),
        })?;
        let (vb, vh, vk, vd) = v.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "v must have shape [batch, heads, k_len, head_dim]".to_string(),
        })?;
        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "k shape mismatch: expected [{batch}, {heads}, {head_dim}, ?] got [{kb}, {kh}, {kd}, {k_len}]"
                ),
            });
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
                ),
            });
        }
        let (mq, mk) = mask.dims2().map_err(|_| AttentionError::InvalidShape {
            context: "mask must have shape [q_len, k_len]".to_string(),
        })?;
        if mq != q_len || mk != k_len {
            return Err(AttentionError::InvalidShape {
                context: format!("mask shape mismatch: expected [{q_len}, {k_len}] got [{mq}, {mk}]"),
            });
        }

        let q_work = policy.cast_for_matmul(q)?.contiguous()?;
        let k_work = policy.cast_for_matmul(k)?.contiguous()?;
        let v_work = policy.cast_for_matmul(v)?.contiguous()?;

        let mut scores = q_work.matmul(&k_work)?;
        if self.scale {
            scores = scores.affine(1.0 / (head_dim as f64).sqrt(), 0.0)?;
        }

        let bias = self.mask_bias(policy);
        let keep = mask.to_dtype(scores.dtype())?;
        // bias · (1 − mask)
        let penalty = keep.affine(-bias, bias)?;
        let masked = scores
            .broadcast_mul(&keep)?
            .broadcast_sub(&penalty)?
            .contiguous()?;

        let weights = softmax_last_dim(&masked)?;
        let output = weights.matmul(&v_work)?;

        Ok(Attended {
            output: policy.cast_to_storage(&output)?,
            weights,
        })
    }
}
