use attention::KvCache;
use candle_core::{DType, Device, Result as CandleResult, Tensor};
use layers::{checks, InitializeParameters, Initializer, LayerNorm, PrecisionPolicy};

use crate::{
    block::DecoderBlock,
    config::{Gpt2Args, ModelConfig},
    errors::{ModelError, Result},
    submodule::SubModule,
};

/// GPT-2 decoder stack: `n_layers` pre-norm blocks followed by a final LayerNorm.
///
/// The stack maps `[batch, seq, hidden]` features to the same shape. Decoding
/// state is a [`KvCache`] owned by the caller; pass
/// [`new_internal_state`](Gpt2::new_internal_state) for a fresh sequence and
/// the returned cache on every later call.
#[derive(Debug, Clone)]
pub struct Gpt2 {
    config: ModelConfig,
    input_shape: Vec<usize>,
    blocks: Vec<DecoderBlock>,
    ln_f: LayerNorm,
    policy: PrecisionPolicy,
}

impl Gpt2 {
    /// Builds the stack for per-sample inputs of shape `[.., seq_len, hidden_dim]`.
    pub fn new(
        input_shape: &[usize],
        id: impl Into<String>,
        args: &Gpt2Args,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let config = ModelConfig::from_args(input_shape, id, args, device, dtype)?;
        let mut model = Self::from_config(config)?;
        model.input_shape = input_shape.to_vec();
        Ok(model)
    }

    /// Builds the stack from a resolved configuration.
    ///
    /// Every block samples its own parameters; no block is cloned from another.
    pub fn from_config(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let blocks = (0..config.n_layers)
            .map(|index| DecoderBlock::new(index, &config))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = LayerNorm::with_init(
            config.norm_config(),
            &config.init,
            &config.device,
            config.dtype,
        )?;
        log::info!(
            "gpt2 '{}': layers={} heads={} hidden={} seq_len={} dtype={:?}",
            config.id,
            config.n_layers,
            config.n_heads,
            config.hidden_dim,
            config.seq_len,
            config.dtype
        );
        Ok(Self {
            input_shape: vec![config.seq_len, config.hidden_dim],
            policy: config.policy(),
            config,
            blocks,
            ln_f,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[DecoderBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [DecoderBlock] {
        &mut self.blocks
    }

    pub fn ln_f(&self) -> &LayerNorm {
        &self.ln_f
    }

    pub fn policy(&self) -> &PrecisionPolicy {
        &self.policy
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// The stack preserves the shape of its input.
    pub fn output_shape(&self) -> Vec<usize> {
        self.input_shape.clone()
    }

    /// Cache for a fresh sequence: one empty entry per block.
    pub fn new_internal_state(&self) -> KvCache {
        KvCache::empty(self.num_layers())
    }

    /// Runs every block in order over `input`, threading each block's cached prefix.
    ///
    /// `input` is `[batch, seq, hidden_dim]`; the cached prefix plus `seq` must
    /// not exceed the configured `seq_len`. Returns the normalised output and
    /// the cache covering all positions processed so far.
    pub fn forward(&self, input: &Tensor, state: &KvCache) -> Result<(Tensor, KvCache)> {
        if state.num_layers() != self.num_layers() {
            return Err(ModelError::StateMismatch(format!(
                "cache holds {} layers, stack has {}",
                state.num_layers(),
                self.num_layers()
            )));
        }
        checks::expect_batch_seq_hidden("gpt2.input", input, self.config.hidden_dim)
            .map_err(|err| ModelError::InvalidInput(err.to_string()))?;
        let seq_len = input.dims()[1];

        let mut hidden = self.policy.cast_to_storage(input)?;
        let mut presents = Vec::with_capacity(self.blocks.len());
        for (block, past) in self.blocks.iter().zip(state.iter()) {
            let (output, present) = block.forward(&hidden, past, &self.policy)?;
            hidden = output;
            presents.push(Some(present));
        }
        let output = self.ln_f.forward(&hidden, &self.policy)?;
        let state = KvCache::from_layers(presents)?;

        log::debug!(
            "gpt2 '{}': forward seq={} cached={}",
            self.config.id,
            seq_len,
            state.seq_len()
        );
        Ok((output, state))
    }
}

impl InitializeParameters for Gpt2 {
    fn initialize_parameters(&mut self, init: &Initializer) -> CandleResult<()> {
        for block in &mut self.blocks {
            block.initialize_parameters(init)?;
        }
        self.ln_f.initialize_parameters(init)
    }
}

impl SubModule for Gpt2 {
    type InternalState = KvCache;

    fn id(&self) -> &str {
        Gpt2::id(self)
    }

    fn input_shape(&self) -> &[usize] {
        Gpt2::input_shape(self)
    }

    fn output_shape(&self) -> Vec<usize> {
        Gpt2::output_shape(self)
    }

    fn forward(&self, input: &Tensor, state: &KvCache) -> Result<(Tensor, KvCache)> {
        Gpt2::forward(self, input, state)
    }

    fn new_internal_state(&self) -> KvCache {
        Gpt2::new_internal_state(self)
    }
}
