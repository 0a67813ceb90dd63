//! Affine projection helpers.
//!
//! A projection maps `(..., input_dim)` to `(..., output_dim)` for any number of
//! leading dimensions: they are collapsed into a single row axis for the matmul
//! and restored afterwards. Weights are stored as `(input_dim, output_dim)` so
//! the forward pass is a plain `x · W + b` (the GPT-2 "Conv1D" layout). Inputs
//! and weights are cast to [`PrecisionPolicy::compute`] for the matmul and the
//! result goes back through
//! [`PrecisionPolicy::cast_to_storage`](crate::dtypes::PrecisionPolicy::cast_to_storage).

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    init::{InitializeParameters, Initializer},
};

/// Configuration for a dense projection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a projection with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Dense affine projection with optional bias and mixed-precision aware forward pass.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with weights sampled from `init` and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: &Initializer,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.weight((config.input_dim, config.output_dim), dtype, device)?;
        let bias = if config.bias {
            Some(init.bias(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Returns the static configuration.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns the `(input_dim, output_dim)` weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Returns the bias tensor if present.
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Replaces the weight, keeping the stored dtype.
    pub fn copy_weight_from(&mut self, value: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            value,
            &[self.config.input_dim, self.config.output_dim],
        )?;
        self.weight = value.to_dtype(self.weight.dtype())?;
        Ok(())
    }

    /// Replaces the bias, keeping the stored dtype.
    pub fn copy_bias_from(&mut self, value: &Tensor) -> Result<()> {
        match &mut self.bias {
            Some(bias) => {
                checks::expect_shape("linear.bias", value, &[self.config.output_dim])?;
                *bias = value.to_dtype(bias.dtype())?;
                Ok(())
            }
            None => Err(Error::Msg("layer has no bias to copy into".into())),
        }
    }

    /// Applies `x · W + b` over the trailing axis of `hidden`.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_last_dim("linear.input", hidden, self.config.input_dim)?;

        let dims = hidden.dims();
        let leading = &dims[..dims.len() - 1];
        let rows: usize = leading.iter().product();
        let mut out_dims = leading.to_vec();
        out_dims.push(self.config.output_dim);

        let flat = policy
            .cast_for_matmul(hidden)?
            .reshape((rows, self.config.input_dim))?
            .contiguous()?;
        let weight = policy.cast_for_matmul(&self.weight)?;
        let mut output = flat.matmul(&weight)?;

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(bias)?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output.reshape(out_dims)?)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.input_dim, config.output_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, &checks::PARAMETER_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, &checks::PARAMETER_DTYPES)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }
}

impl InitializeParameters for Linear {
    fn initialize_parameters(&mut self, init: &Initializer) -> Result<()> {
        let dtype = self.weight.dtype();
        let device = self.weight.device().clone();
        self.weight = init.weight(
            (self.config.input_dim, self.config.output_dim),
            dtype,
            &device,
        )?;
        if let Some(bias) = &mut self.bias {
            *bias = init.bias(self.config.output_dim, dtype, &device)?;
        }
        Ok(())
    }
}
