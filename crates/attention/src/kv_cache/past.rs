//! Keys and values already computed for one layer.

use candle_core::Tensor;

use crate::core::AttentionError;

/// Cached projections of one attention layer.
///
/// Keys are kept transposed, `[batch, heads, head_dim, past_len]`, so they can
/// be multiplied against queries without another permute. Values keep the
/// natural `[batch, heads, past_len, head_dim]` layout. Entries are immutable:
/// [`LayerPast::extend`] returns a new, longer entry and leaves `self` intact.
#[derive(Debug, Clone)]
pub struct LayerPast {
    key: Tensor,
    value: Tensor,
}

impl LayerPast {
    /// Wraps cached key/value tensors after checking they describe the same prefix.
    pub fn new(key: Tensor, value: Tensor) -> Result<Self, AttentionError> {
        let (kb, kh, kd, kp) = key.dims4().map_err(|_| AttentionError::CacheMismatch {
            context: format!(
                "key must be [batch, heads, head_dim, past_len], got {:?}",
                key.dims()
            ),
        })?;
        let (vb, vh, vp, vd) = value.dims4().map_err(|_| AttentionError::CacheMismatch {
            context: format!(
                "value must be [batch, heads, past_len, head_dim], got {:?}",
                value.dims()
            ),
        })?;
        if (kb, kh, kd, kp) != (vb, vh, vd, vp) {
            return Err(AttentionError::CacheMismatch {
                context: format!(
                    "key {:?} and value {:?} disagree",
                    key.dims(),
                    value.dims()
                ),
            });
        }
        if key.dtype() != value.dtype() {
            return Err(AttentionError::CacheMismatch {
                context: format!(
                    "key dtype {:?} differs from value dtype {:?}",
                    key.dtype(),
                    value.dtype()
                ),
            });
        }
        Ok(Self { key, value })
    }

    /// `[batch, heads, head_dim, past_len]`
    pub fn key(&self) -> &Tensor {
        &self.key
    }

    /// `[batch, heads, past_len, head_dim]`
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn batch(&self) -> usize {
        self.value.dims()[0]
    }

    pub fn num_heads(&self) -> usize {
        self.value.dims()[1]
    }

    /// Number of positions already processed.
    pub fn seq_len(&self) -> usize {
        self.value.dims()[2]
    }

    pub fn head_dim(&self) -> usize {
        self.value.dims()[3]
    }

    /// Appends `key`/`value` for new positions, returning the extended entry.
    ///
    /// `key` must be `[batch, heads, head_dim, new_len]` and `value`
    /// `[batch, heads, new_len, head_dim]` with batch, heads and head_dim
    /// matching the cached prefix.
    pub fn extend(&self, key: &Tensor, value: &Tensor) -> Result<Self, AttentionError> {
        let step = Self::new(key.clone(), value.clone())?;
        let expected = (self.batch(), self.num_heads(), self.head_dim());
        let actual = (step.batch(), step.num_heads(), step.head_dim());
        if expected != actual {
            return Err(AttentionError::CacheMismatch {
                context: format!(
                    "cached (batch, heads, head_dim) = {:?}, current = {:?}",
                    expected, actual
                ),
            });
        }
        if self.key.dtype() != step.key.dtype() {
            return Err(AttentionError::CacheMismatch {
                context: format!(
                    "cached dtype {:?}, current dtype {:?}",
                    self.key.dtype(),
                    step.key.dtype()
                ),
            });
        }
        let key = Tensor::cat(&[&self.key, &step.key], 3)?;
        let value = Tensor::cat(&[&self.value, &step.value], 2)?;
        log::debug!(
            "kv-cache extend: past_len={} new_len={}",
            self.seq_len(),
            step.seq_len()
        );
        Ok(Self { key, value })
    }
}
