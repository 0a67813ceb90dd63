//! Building blocks for GPT-2 style decoder layers.
//!
//! This crate hosts the affine projections, layer normalisation and
//! feed-forward network used by the decoder blocks, together with the shared
//! precision policy and parameter initialisation capability. Everything is
//! assembled from Candle primitives.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod init;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use dtypes::PrecisionPolicy;
pub use init::{InitializeParameters, Initializer};
pub use linear::{Linear, LinearConfig};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
