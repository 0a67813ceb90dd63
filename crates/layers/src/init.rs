//! Parameter initialisation shared by every learned component.
//!
//! Each module that owns parameters implements [`InitializeParameters`] and
//! forwards the call to its children, so a container can re-initialise a whole
//! stack without inspecting the concrete type of each submodule.

use candle_core::{DType, Device, Result, Shape, Tensor};

/// Standard deviation of the GPT-2 projection weight distribution.
pub const GPT2_WEIGHT_STD: f64 = 0.02;

/// Sampling policy for learned parameters.
///
/// Projection weights are drawn from `N(0, weight_std)`, projection biases and
/// normalisation shifts start at zero and normalisation scales start at one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Initializer {
    /// Standard deviation of the zero-mean Gaussian used for weights.
    pub weight_std: f64,
}

impl Initializer {
    /// Initializer matching the GPT-2 recipe.
    pub fn gpt2() -> Self {
        Self {
            weight_std: GPT2_WEIGHT_STD,
        }
    }

    /// Samples a projection weight.
    pub fn weight<S: Into<Shape>>(&self, shape: S, dtype: DType, device: &Device) -> Result<Tensor> {
        let sampled = Tensor::randn(0f32, self.weight_std as f32, shape, device)?;
        if dtype == DType::F32 {
            Ok(sampled)
        } else {
            sampled.to_dtype(dtype)
        }
    }

    /// Zero-filled bias or shift vector.
    pub fn bias(&self, len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
        Tensor::zeros(len, dtype, device)
    }

    /// Unit scale vector for normalisation layers.
    pub fn scale(&self, len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
        Tensor::ones(len, dtype, device)
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::gpt2()
    }
}

/// Capability implemented by every module owning learned parameters.
pub trait InitializeParameters {
    /// Resamples all parameters of `self` (and its children) following `init`.
    fn initialize_parameters(&mut self, init: &Initializer) -> Result<()>;
}
