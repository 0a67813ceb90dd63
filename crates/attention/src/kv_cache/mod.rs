//! Key/value cache types for incremental decoding.
//!
//! [`LayerPast`] holds one layer's keys and values; [`KvCache`] indexes them by
//! layer. Both are snapshots: appending produces a new value rather than
//! mutating shared state, so callers own the decoding state explicitly.

pub mod past;
pub mod store;

pub use past::LayerPast;
pub use store::KvCache;

#[cfg(test)]
mod tests;
