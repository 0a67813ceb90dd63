use std::{fs, path::Path};

use attention::Config as AttentionConfig;
use candle_core::{DType, Device};
use layers::{checks::PARAMETER_DTYPES, Initializer, NormConfig, PrecisionPolicy};
use serde::Deserialize;

use crate::errors::{ModelError, Result};

fn default_nb_layer() -> usize {
    12
}

fn default_nb_head() -> usize {
    12
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

/// Hyperparameters a host framework supplies when it builds the stack.
///
/// Missing keys fall back to the GPT-2 small values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Gpt2Args {
    #[serde(default = "default_nb_layer")]
    pub nb_layer: usize,
    #[serde(default = "default_nb_head")]
    pub nb_head: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    /// Overrides the dtype-derived bias applied to masked attention logits.
    #[serde(default)]
    pub mask_bias: Option<f64>,
}

impl Default for Gpt2Args {
    fn default() -> Self {
        Self {
            nb_layer: default_nb_layer(),
            nb_head: default_nb_head(),
            layer_norm_eps: default_layer_norm_eps(),
            mask_bias: None,
        }
    }
}

impl Gpt2Args {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads arguments from a `.json` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let args = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            Some("toml") | Some("tml") | None => Self::from_toml_str(&contents)?,
            Some(other) => {
                return Err(ModelError::InvalidConfig(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };
        log::debug!("loaded gpt2 args from {}: {:?}", path.display(), args);
        Ok(args)
    }
}

/// Fully resolved construction parameters of a [`Gpt2`](crate::Gpt2) stack.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub id: String,
    /// Longest `past + current` sequence the stack accepts (`S`).
    pub seq_len: usize,
    /// Feature width (`F`).
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub layer_norm_eps: f64,
    pub scale: bool,
    pub mask_bias: Option<f64>,
    pub init: Initializer,
    pub dtype: DType,
    pub device: Device,
}

impl ModelConfig {
    /// Resolves `args` against a `[.., seq_len, hidden_dim]` input shape.
    ///
    /// Attention scores are always scaled, as in GPT-2.
    pub fn from_args(
        input_shape: &[usize],
        id: impl Into<String>,
        args: &Gpt2Args,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let [.., seq_len, hidden_dim] = *input_shape else {
            return Err(ModelError::InvalidConfig(format!(
                "input shape must end with [seq_len, hidden_dim], got {:?}",
                input_shape
            )));
        };
        Ok(Self {
            id: id.into(),
            seq_len,
            hidden_dim,
            n_layers: args.nb_layer,
            n_heads: args.nb_head,
            layer_norm_eps: args.layer_norm_eps,
            scale: true,
            mask_bias: args.mask_bias,
            init: Initializer::gpt2(),
            dtype,
            device: device.clone(),
        })
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.n_heads.max(1)
    }

    pub fn attention_config(&self) -> AttentionConfig {
        AttentionConfig {
            hidden_size: self.hidden_dim,
            max_seq_len: self.seq_len,
            num_heads: self.n_heads,
            scale: self.scale,
            mask_bias: self.mask_bias,
        }
    }

    pub fn norm_config(&self) -> NormConfig {
        NormConfig::new(self.hidden_dim).with_epsilon(self.layer_norm_eps)
    }

    pub fn policy(&self) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(self.dtype)
    }

    /// Checks every structural invariant before any parameter is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.n_layers == 0 {
            return Err(ModelError::InvalidConfig(
                "n_layers must be greater than zero".into(),
            ));
        }
        if !(self.layer_norm_eps.is_finite() && self.layer_norm_eps > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "layer_norm_eps must be a positive finite value, got {}",
                self.layer_norm_eps
            )));
        }
        if !(self.init.weight_std.is_finite() && self.init.weight_std >= 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "init weight_std must be a non-negative finite value, got {}",
                self.init.weight_std
            )));
        }
        if !PARAMETER_DTYPES.contains(&self.dtype) {
            return Err(ModelError::InvalidConfig(format!(
                "parameters must be stored as a float dtype, got {:?}",
                self.dtype
            )));
        }
        self.attention_config().validate()?;
        Ok(())
    }
}
