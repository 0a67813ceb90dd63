use attention::{CausalSelfAttention, LayerPast};
use candle_core::{Result as CandleResult, Tensor};
use layers::{
    FeedForward, FeedForwardConfig, InitializeParameters, Initializer, LayerNorm, PrecisionPolicy,
};

use crate::{
    config::ModelConfig,
    errors::{ModelError, Result},
};

/// Pre-norm decoder block: `x + attn(ln_1(x))` followed by `x + mlp(ln_2(x))`.
#[derive(Debug, Clone)]
pub struct DecoderBlock {
    index: usize,
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    ln_2: LayerNorm,
    mlp: FeedForward,
}

impl DecoderBlock {
    /// Builds block `index` with freshly sampled parameters.
    pub fn new(index: usize, config: &ModelConfig) -> Result<Self> {
        let device = &config.device;
        let dtype = config.dtype;
        let ln_1 = LayerNorm::with_init(config.norm_config(), &config.init, device, dtype)?;
        let attn =
            CausalSelfAttention::new(config.attention_config(), &config.init, device, dtype)?;
        let ln_2 = LayerNorm::with_init(config.norm_config(), &config.init, device, dtype)?;
        let mlp = FeedForward::with_init(
            FeedForwardConfig::gpt2(config.hidden_dim),
            &config.init,
            device,
            dtype,
        )?;
        Self::from_parts(index, ln_1, attn, ln_2, mlp)
    }

    /// Assembles a block from existing sublayers, checking their widths agree.
    pub fn from_parts(
        index: usize,
        ln_1: LayerNorm,
        attn: CausalSelfAttention,
        ln_2: LayerNorm,
        mlp: FeedForward,
    ) -> Result<Self> {
        let hidden = attn.config().hidden_size;
        let widths = [
            ("ln_1", ln_1.config().hidden_size),
            ("ln_2", ln_2.config().hidden_size),
            ("mlp", mlp.config().hidden_size),
        ];
        if let Some((name, width)) = widths.iter().find(|(_, width)| *width != hidden) {
            return Err(ModelError::InvalidConfig(format!(
                "block {index}: {name} has width {width}, attention expects {hidden}"
            )));
        }
        Ok(Self {
            index,
            ln_1,
            attn,
            ln_2,
            mlp,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ln_1(&self) -> &LayerNorm {
        &self.ln_1
    }

    pub fn attn(&self) -> &CausalSelfAttention {
        &self.attn
    }

    pub fn attn_mut(&mut self) -> &mut CausalSelfAttention {
        &mut self.attn
    }

    pub fn ln_2(&self) -> &LayerNorm {
        &self.ln_2
    }

    pub fn mlp(&self) -> &FeedForward {
        &self.mlp
    }

    /// Runs the block over `hidden`, extending `past` with the current positions.
    pub fn forward(
        &self,
        hidden: &Tensor,
        past: Option<&LayerPast>,
        policy: &PrecisionPolicy,
    ) -> Result<(Tensor, LayerPast)> {
        let normed = self.ln_1.forward(hidden, policy)?;
        let (attended, present) = self.attn.forward(&normed, past, policy)?;
        let hidden = hidden.add(&attended)?;

        let normed = self.ln_2.forward(&hidden, policy)?;
        let projected = self.mlp.forward(&normed, policy)?;
        let output = hidden.add(&projected)?;

        log::debug!(
            "block {}: processed {} positions, cached {}",
            self.index,
            hidden.dims()[1],
            present.seq_len()
        );
        Ok((output, present))
    }
}

impl InitializeParameters for DecoderBlock {
    fn initialize_parameters(&mut self, init: &Initializer) -> CandleResult<()> {
        self.ln_1.initialize_parameters(init)?;
        self.attn.initialize_parameters(init)?;
        self.ln_2.initialize_parameters(init)?;
        self.mlp.initialize_parameters(init)
    }
}
