//! Contract between a network body and the composition framework hosting it.
//!
//! A submodule is built for a fixed per-sample `input_shape`, consumes a
//! batched tensor together with the state it produced on the previous call
//! and hands back its output plus the next state. The framework owns the
//! state; the submodule never stores it.

use candle_core::Tensor;

use crate::errors::Result;

pub trait SubModule {
    /// State threaded between successive forward calls.
    type InternalState;

    /// Identifier assigned by the framework.
    fn id(&self) -> &str;

    /// Per-sample shape the module was built for, without the batch axis.
    fn input_shape(&self) -> &[usize];

    /// Per-sample shape of the forward output, without the batch axis.
    fn output_shape(&self) -> Vec<usize>;

    fn forward(
        &self,
        input: &Tensor,
        state: &Self::InternalState,
    ) -> Result<(Tensor, Self::InternalState)>;

    /// State to use at the start of a fresh sequence.
    fn new_internal_state(&self) -> Self::InternalState;
}
