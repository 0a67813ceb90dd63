//! Causal multi-head self-attention for GPT-2 style decoders.
//!
//! The crate exposes [`CausalSelfAttention`], which projects `[batch, seq,
//! hidden]` activations to queries, keys and values, attends over the cached
//! prefix plus the current chunk under a fixed lower-triangular mask, and
//! projects the merged heads back to `hidden` features.
//!
//! Decoding state lives outside the module. Every forward call takes the
//! previous [`LayerPast`] (if any) and returns the extended one, and
//! [`KvCache`] bundles those entries for a whole stack of layers.
//!
//! Masked logits are pushed down by a large finite bias rather than `-inf`,
//! so rows never contain NaNs. The bias follows the compute dtype of the
//! [`PrecisionPolicy`](layers::PrecisionPolicy) unless [`Config::mask_bias`]
//! overrides it.

pub mod causal;
pub mod core;
pub mod kv_cache;
pub mod masks;
pub mod reference;

pub use causal::{AttentionStep, CausalSelfAttention};
pub use core::{Attended, Attention, AttentionError, Config};
pub use kv_cache::{KvCache, LayerPast};
pub use masks::CausalMask;
pub use reference::ExactAttention;
