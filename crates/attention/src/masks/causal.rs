//! Fixed lower-triangular causal mask.
//!
//! The full `[max_seq_len, max_seq_len]` matrix is built once. Each forward
//! call takes the `[q_len, k_len]` window whose rows are aligned to the end
//! of the key range, so query `i` of the current chunk (absolute position
//! `k_len - q_len + i`) sees keys `0..=k_len - q_len + i`.

use candle_core::{Device, Tensor};

use super::MASK_DTYPE;
use crate::core::AttentionError;

/// Multiplicative causal mask: `1.0` keeps a score, `0.0` masks it.
#[derive(Debug, Clone)]
pub struct CausalMask {
    max_seq_len: usize,
    mask: Tensor,
}

impl CausalMask {
    /// Builds the triangular mask for sequences up to `max_seq_len`.
    pub fn new(max_seq_len: usize, device: &Device) -> Result<Self, AttentionError> {
        let mut data = vec![0f32; max_seq_len * max_seq_len];
        for row in 0..max_seq_len {
            for col in 0..=row {
                data[row * max_seq_len + col] = 1.0;
            }
        }
        let mask = Tensor::from_vec(data, (max_seq_len, max_seq_len), device)?
            .to_dtype(MASK_DTYPE)?;
        Ok(Self { max_seq_len, mask })
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Full `[max_seq_len, max_seq_len]` mask.
    pub fn full(&self) -> &Tensor {
        &self.mask
    }

    /// Slices the `[q_len, k_len]` window for `k_len - q_len` cached positions.
    pub fn window(&self, q_len: usize, k_len: usize) -> Result<Tensor, AttentionError> {
        if k_len > self.max_seq_len {
            return Err(AttentionError::SequenceOutOfBounds {
                requested: k_len,
                max_seq_len: self.max_seq_len,
            });
        }
        if q_len == 0 || q_len > k_len {
            return Err(AttentionError::InvalidShape {
                context: format!("causal mask window q_len={q_len} k_len={k_len}"),
            });
        }
        let window = self
            .mask
            .narrow(0, k_len - q_len, q_len)?
            .narrow(1, 0, k_len)?;
        Ok(window)
    }
}
