//! GPT-2 style masked multi-head self-attention.
//!
//! A single fused projection `c_attn` maps the `F` input features to the
//! concatenated queries, keys and values (`3F`). The heads are split out,
//! the current keys and values are appended to the caller's cached prefix,
//! and the masked softmax runs through [`ExactAttention`]. Heads are merged
//! back and projected by `c_proj`.

use candle_core::{DType, Device, Tensor};
use layers::{InitializeParameters, Initializer, Linear, LinearConfig, PrecisionPolicy};

use crate::core::{Attention, AttentionError, Config};
use crate::kv_cache::LayerPast;
use crate::masks::CausalMask;
use crate::reference::ExactAttention;

/// Everything produced by one attention step.
#[derive(Debug, Clone)]
pub struct AttentionStep {
    /// `[batch, seq, hidden]` projected context.
    pub output: Tensor,
    /// Cached keys and values covering `past + seq` positions.
    pub present: LayerPast,
    /// `[batch, heads, seq, past + seq]` softmax weights.
    pub weights: Tensor,
}

/// Masked multi-head self-attention with an explicit key/value prefix.
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    config: Config,
    c_attn: Linear,
    c_proj: Linear,
    mask: CausalMask,
    kernel: ExactAttention,
}

impl CausalSelfAttention {
    /// Builds the module with freshly sampled projections.
    ///
    /// The configuration is validated before any parameter is allocated.
    pub fn new(
        config: Config,
        init: &Initializer,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let hidden = config.hidden_size;
        let c_attn = Linear::with_init(LinearConfig::new(hidden, 3 * hidden), init, device, dtype)?;
        let c_proj = Linear::with_init(LinearConfig::new(hidden, hidden), init, device, dtype)?;
        log::info!(
            "attention: hidden={} heads={} head_dim={} max_seq_len={}",
            hidden,
            config.num_heads,
            config.head_dim(),
            config.max_seq_len
        );
        Self::from_parts(config, c_attn, c_proj, device)
    }

    /// Assembles the module around existing projections.
    pub fn from_parts(
        config: Config,
        c_attn: Linear,
        c_proj: Linear,
        device: &Device,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let hidden = config.hidden_size;
        let attn_cfg = c_attn.config();
        if attn_cfg.input_dim != hidden || attn_cfg.output_dim != 3 * hidden {
            return Err(AttentionError::InvalidConfig(format!(
                "c_attn must map {hidden} -> {}, got {} -> {}",
                3 * hidden,
                attn_cfg.input_dim,
                attn_cfg.output_dim
            )));
        }
        let proj_cfg = c_proj.config();
        if proj_cfg.input_dim != hidden || proj_cfg.output_dim != hidden {
            return Err(AttentionError::InvalidConfig(format!(
                "c_proj must map {hidden} -> {hidden}, got {} -> {}",
                proj_cfg.input_dim, proj_cfg.output_dim
            )));
        }
        let mask = CausalMask::new(config.max_seq_len, device)?;
        let kernel = ExactAttention::new(config.scale, config.mask_bias);
        Ok(Self {
            config,
            c_attn,
            c_proj,
            mask,
            kernel,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn c_attn(&self) -> &Linear {
        &self.c_attn
    }

    pub fn c_attn_mut(&mut self) -> &mut Linear {
        &mut self.c_attn
    }

    pub fn c_proj(&self) -> &Linear {
        &self.c_proj
    }

    pub fn c_proj_mut(&mut self) -> &mut Linear {
        &mut self.c_proj
    }

    pub fn mask(&self) -> &CausalMask {
        &self.mask
    }

    /// Attends over `past + hidden`, returning the output and the new prefix.
    ///
    /// `hidden` is `[batch, seq, hidden_size]`. `past`, when given, must come
    /// from a previous call on the same module with the same batch size.
    pub fn forward(
        &self,
        hidden: &Tensor,
        past: Option<&LayerPast>,
        policy: &PrecisionPolicy,
    ) -> Result<(Tensor, LayerPast), AttentionError> {
        let step = self.forward_with_weights(hidden, past, policy)?;
        Ok((step.output, step.present))
    }

    /// Same as [`forward`](Self::forward) but also exposes the attention weights.
    pub fn forward_with_weights(
        &self,
        hidden: &Tensor,
        past: Option<&LayerPast>,
        policy: &PrecisionPolicy,
    ) -> Result<AttentionStep, AttentionError> {
        let (batch, seq_len, features) = self.check_input(hidden)?;
        let past_len = past.map(LayerPast::seq_len).unwrap_or(0);
        let total = past_len + seq_len;
        if total > self.config.max_seq_len {
            return Err(AttentionError::SequenceOutOfBounds {
                requested: total,
                max_seq_len: self.config.max_seq_len,
            });
        }

        let qkv = self.c_attn.forward(hidden, policy)?;
        let query = self.split_heads(&qkv.narrow(2, 0, features)?, false)?;
        let key = self.split_heads(&qkv.narrow(2, features, features)?, true)?;
        let value = self.split_heads(&qkv.narrow(2, 2 * features, features)?, false)?;

        let present = match past {
            Some(prefix) => {
                if prefix.batch() != batch {
                    return Err(AttentionError::CacheMismatch {
                        context: format!(
                            "cached batch {} differs from input batch {batch}",
                            prefix.batch()
                        ),
                    });
                }
                prefix.extend(&key, &value)?
            }
            None => LayerPast::new(key, value)?,
        };

        let mask = self.mask.window(seq_len, total)?;
        let attended = self
            .kernel
            .attend(&query, present.key(), present.value(), &mask, policy)?;
        let merged = self.merge_heads(&attended.output)?;
        let output = self.c_proj.forward(&merged, policy)?;

        log::trace!("attention step: batch={batch} seq={seq_len} past={past_len}");
        Ok(AttentionStep {
            output,
            present,
            weights: attended.weights,
        })
    }

    /// `[B, T, F]` to `[B, H, T, D]`, or `[B, H, D, T]` when `transpose_key`.
    pub fn split_heads(&self, x: &Tensor, transpose_key: bool) -> Result<Tensor, AttentionError> {
        let (batch, seq_len, _) = x.dims3()?;
        let heads = self.config.num_heads;
        let head_dim = self.config.head_dim();
        let split = x.reshape((batch, seq_len, heads, head_dim))?;
        let permuted = if transpose_key {
            split.permute((0, 2, 3, 1))?
        } else {
            split.permute((0, 2, 1, 3))?
        };
        Ok(permuted.contiguous()?)
    }

    /// `[B, H, T, D]` back to `[B, T, F]`.
    pub fn merge_heads(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, heads, seq_len, head_dim) = x.dims4()?;
        Ok(x
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((batch, seq_len, heads * head_dim))?)
    }

    fn check_input(&self, hidden: &Tensor) -> Result<(usize, usize, usize), AttentionError> {
        let (batch, seq_len, features) =
            hidden.dims3().map_err(|_| AttentionError::InvalidShape {
                context: format!(
                    "attention input must be [batch, seq, hidden], got {:?}",
                    hidden.dims()
                ),
            })?;
        if features != self.config.hidden_size {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "attention input has {features} features, expected {}",
                    self.config.hidden_size
                ),
            });
        }
        if batch == 0 || seq_len == 0 {
            return Err(AttentionError::InvalidShape {
                context: format!("empty attention input {:?}", hidden.dims()),
            });
        }
        Ok((batch, seq_len, features))
    }
}

impl InitializeParameters for CausalSelfAttention {
    fn initialize_parameters(&mut self, init: &Initializer) -> candle_core::Result<()> {
        self.c_attn.initialize_parameters(init)?;
        self.c_proj.initialize_parameters(init)
    }
}
