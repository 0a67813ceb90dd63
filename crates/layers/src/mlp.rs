//! Position-wise feed-forward block.
//!
//! The MLP operates on hidden states shaped `(batch, seq, hidden)` and returns
//! the same layout: an expansion projection to `intermediate_size`, the tanh
//! GELU, and a contraction back to `hidden_size`. GPT-2 uses an expansion
//! factor of four.

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{
    activations,
    dtypes::PrecisionPolicy,
    init::{InitializeParameters, Initializer},
    linear::{Linear, LinearConfig},
};

/// Width multiplier between the hidden size and the activation space.
pub const GPT2_EXPANSION: usize = 4;

/// Configuration of a feed-forward network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
}

impl FeedForwardConfig {
    /// Creates a configuration with an explicit intermediate width.
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
        }
    }

    /// GPT-2 layout with a 4x expansion.
    pub fn gpt2(hidden_size: usize) -> Self {
        Self::new(hidden_size, GPT2_EXPANSION * hidden_size)
    }
}

/// Two affine projections with a GELU in between.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    c_fc: Linear,
    c_proj: Linear,
}

impl FeedForward {
    /// Assembles the MLP from existing projections.
    pub fn new(config: FeedForwardConfig, c_fc: Linear, c_proj: Linear) -> Result<Self> {
        let fc = c_fc.config();
        let proj = c_proj.config();
        if fc.input_dim != config.hidden_size
            || fc.output_dim != config.intermediate_size
            || proj.input_dim != config.intermediate_size
            || proj.output_dim != config.hidden_size
        {
            return Err(Error::Msg(format!(
                "feed-forward projections {}->{} / {}->{} do not match config {:?}",
                fc.input_dim, fc.output_dim, proj.input_dim, proj.output_dim, config
            )));
        }
        Ok(Self {
            config,
            c_fc,
            c_proj,
        })
    }

    /// Builds the MLP with freshly sampled projections.
    pub fn with_init(
        config: FeedForwardConfig,
        init: &Initializer,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let c_fc = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            device,
            dtype,
        )?;
        let c_proj = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            device,
            dtype,
        )?;
        Self::new(config, c_fc, c_proj)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn c_fc(&self) -> &Linear {
        &self.c_fc
    }

    pub fn c_proj(&self) -> &Linear {
        &self.c_proj
    }

    /// Performs the forward pass through the MLP.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let expanded = self.c_fc.forward(hidden, policy)?;
        let activated = activations::gelu(&expanded, policy)?;
        self.c_proj.forward(&activated, policy)
    }
}

impl InitializeParameters for FeedForward {
    fn initialize_parameters(&mut self, init: &Initializer) -> Result<()> {
        self.c_fc.initialize_parameters(init)?;
        self.c_proj.initialize_parameters(init)
    }
}
