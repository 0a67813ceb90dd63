//! Mask utilities shared by attention implementations.
//!
//! Masks produced here are multiplicative `0.0`/`1.0` tensors with dtype
//! [`MASK_DTYPE`]. Kernels turn them into a large finite negative bias rather
//! than `-inf` so fully masked rows never produce NaNs.

pub mod causal;

use candle_core::DType;

/// Dtype shared by all masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::CausalMask;
