//! Configuration shared by the attention module and its kernel.
//!
//! The [`Config`] struct captures the construction-time geometry (feature
//! width, head count, maximum sequence length) plus the numeric knobs of the
//! masked softmax.

use super::AttentionError;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Width `F` of the incoming feature axis.
    pub hidden_size: usize,
    /// Largest `past + current` sequence length the causal mask can cover.
    pub max_seq_len: usize,
    /// Number of heads `H`; must divide `hidden_size`.
    pub num_heads: usize,
    /// Divide raw scores by `sqrt(F / H)` before masking.
    pub scale: bool,
    /// Bias subtracted from masked logits.
    ///
    /// When `None` the bias is derived from the compute dtype of the active
    /// [`PrecisionPolicy`](layers::PrecisionPolicy).
    pub mask_bias: Option<f64>,
}

impl Config {
    /// Creates a scaled configuration with a dtype-derived mask bias.
    pub fn new(hidden_size: usize, max_seq_len: usize, num_heads: usize) -> Self {
        Self {
            hidden_size,
            max_seq_len,
            num_heads,
            scale: true,
            mask_bias: None,
        }
    }

    /// Features per head (`F / H`).
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads.max(1)
    }

    /// Checks the structural invariants; called before any parameter is allocated.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.hidden_size == 0 {
            return Err(AttentionError::InvalidConfig(
                "hidden_size must be greater than zero".into(),
            ));
        }
        if self.num_heads == 0 {
            return Err(AttentionError::InvalidConfig(
                "num_heads must be greater than zero".into(),
            ));
        }
        if self.max_seq_len == 0 {
            return Err(AttentionError::InvalidConfig(
                "max_seq_len must be greater than zero".into(),
            ));
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(AttentionError::HeadsNotDivisible {
                hidden_size: self.hidden_size,
                num_heads: self.num_heads,
            });
        }
        if let Some(bias) = self.mask_bias {
            if !bias.is_finite() || bias <= 0.0 {
                return Err(AttentionError::InvalidConfig(format!(
                    "mask_bias must be a positive finite value, got {bias}"
                )));
            }
        }
        Ok(())
    }
}
