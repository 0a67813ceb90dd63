//! Activation used by the GPT-2 feed-forward network.
//!
//! GPT-2 uses the tanh approximation of GELU:
//! `0.5 · x · (1 + tanh(sqrt(2/π) · (x + 0.044715 · x³)))`.
//! The formula is evaluated in [`PrecisionPolicy::compute`] and the result is
//! cast back to the storage dtype.

use std::f64::consts::PI;

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

const GELU_CUBIC_COEFF: f64 = 0.044715;

/// Elementwise tanh-approximated GELU.
pub fn gelu(input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
    let x = policy.cast_for_matmul(input)?;
    let cubic = x.sqr()?.mul(&x)?;
    let inner = x
        .add(&cubic.affine(GELU_CUBIC_COEFF, 0.0)?)?
        .affine((2.0 / PI).sqrt(), 0.0)?
        .tanh()?;
    // 0.5 · (1 + tanh(..))
    let gate = inner.affine(0.5, 0.5)?;
    policy.cast_to_storage(&x.mul(&gate)?)
}
