//! Precision and dtype policy utilities used throughout the decoder stack.
//!
//! Parameters may reside in `f16`/`bf16` for memory efficiency while matmuls,
//! softmax and normalisation statistics are promoted to `f32`. This module
//! exposes [`PrecisionPolicy`] so callers can consistently cast tensors before
//! matmuls, reductions, or final outputs, and so attention can pick a mask bias
//! that stays finite in the active compute dtype.

use candle_core::{DType, Result, Tensor};

/// Bias subtracted from masked attention logits when computing in a wide float.
pub const DEFAULT_MASK_BIAS: f64 = 1e10;

/// Bias used when attention logits are computed in `f16` (max finite 65504).
pub const F16_MASK_BIAS: f64 = 3.0e4;

/// Describes how tensors should be cast during different phases of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Constructs a new policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Builds a policy from the parameter storage dtype.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        let reduction = match storage {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        Self::new(storage, compute, reduction)
    }

    /// Returns the dtype used to store parameters and outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Returns the dtype used for matmuls, softmax and activation evaluation.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Returns the dtype used for reductions such as layer norm statistics.
    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Updates the compute dtype, keeping reduction at least as wide.
    pub fn with_compute(mut self, compute: DType) -> Self {
        self.compute = compute;
        if matches!(compute, DType::F64 | DType::F32) {
            self.reduction = compute;
        }
        self
    }

    /// Large finite bias pushing masked logits to zero softmax weight.
    ///
    /// The value depends on the compute dtype: the biased logit must stay
    /// finite, otherwise a fully masked row would turn into NaNs.
    pub fn mask_bias(&self) -> f64 {
        match self.compute {
            DType::F16 => F16_MASK_BIAS,
            _ => DEFAULT_MASK_BIAS,
        }
    }

    /// Casts a tensor to the compute dtype for matmul readiness.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype for statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype (or leaves it unchanged).
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self::from_parameter_dtype(DType::F32)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
