//! Layer normalisation with learned scale and shift.
//!
//! Normalisation happens along the last axis while preserving the original
//! layout, so any tensor whose trailing dimension matches
//! [`NormConfig::hidden_size`] is accepted. Statistics (mean, biased variance)
//! are computed in [`PrecisionPolicy::reduction`] before the result is cast
//! back to the storage dtype. Epsilon sits inside the square root.

use candle_core::{DType, Device, Result, Tensor, D};

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    init::{InitializeParameters, Initializer},
};

/// Default numeric stabiliser added to the variance.
pub const DEFAULT_EPSILON: f64 = 1e-5;

/// Configuration for a layer normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser applied to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration using the default epsilon.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Overrides the epsilon.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Standard LayerNorm with learnable affine parameters.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    /// Constructs a LayerNorm with the supplied scale and shift parameters.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.weight", &weight, &checks::PARAMETER_DTYPES)?;
        checks::expect_shape("norm.bias", &bias, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.bias", &bias, &checks::PARAMETER_DTYPES)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Constructs a LayerNorm with unit scale and zero shift.
    pub fn with_init(
        config: NormConfig,
        init: &Initializer,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.scale(config.hidden_size, dtype, device)?;
        let bias = init.bias(config.hidden_size, dtype, device)?;
        Self::new(weight, bias, config)
    }

    /// Returns the configuration so callers can check shape compatibility.
    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Learned scale.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Learned shift.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Applies the normalisation over the trailing axis of `hidden`.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_last_dim("norm.input", hidden, self.config.hidden_size)?;

        let compute = policy.cast_for_reduction(hidden)?;
        let mean = compute.mean_keepdim(D::Minus1)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = variance.affine(1.0, self.config.epsilon)?.sqrt()?;
        let normalized = centered.broadcast_div(&denom)?;

        let weight = self.weight.to_dtype(normalized.dtype())?;
        let bias = self.bias.to_dtype(normalized.dtype())?;
        let output = normalized.broadcast_mul(&weight)?.broadcast_add(&bias)?;

        policy.cast_to_storage(&output)
    }
}

impl InitializeParameters for LayerNorm {
    fn initialize_parameters(&mut self, init: &Initializer) -> Result<()> {
        let dtype = self.weight.dtype();
        let device = self.weight.device().clone();
        self.weight = init.scale(self.config.hidden_size, dtype, &device)?;
        self.bias = init.bias(self.config.hidden_size, dtype, &device)?;
        Ok(())
    }
}
