//! Per-layer cache container owned by the caller.

use crate::core::AttentionError;

use super::LayerPast;

/// Incremental decoding state for a stack of attention layers.
///
/// The cache is indexed by layer and owned by the caller, who threads it
/// through successive forward calls. A fresh cache holds `None` for every
/// layer; each forward call returns a new cache whose entries cover the whole
/// processed prefix.
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    layers: Vec<Option<LayerPast>>,
}

impl KvCache {
    /// Cache for a fresh sequence: every layer starts without a prefix.
    pub fn empty(num_layers: usize) -> Self {
        Self {
            layers: vec![None; num_layers],
        }
    }

    /// Builds a cache from per-layer entries, checking they share one prefix length.
    pub fn from_layers(layers: Vec<Option<LayerPast>>) -> Result<Self, AttentionError> {
        let mut lengths = layers
            .iter()
            .map(|entry| entry.as_ref().map(LayerPast::seq_len));
        if let Some(first) = lengths.next() {
            if let Some(other) = lengths.find(|len| *len != first) {
                return Err(AttentionError::CacheMismatch {
                    context: format!(
                        "layers disagree on cached length: {:?} vs {:?}",
                        first, other
                    ),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Entry for `layer`; `None` at sequence start or for an unknown index.
    pub fn layer(&self, layer: usize) -> Option<&LayerPast> {
        self.layers.get(layer).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&LayerPast>> {
        self.layers.iter().map(Option::as_ref)
    }

    /// Number of positions already processed (0 for a fresh cache).
    pub fn seq_len(&self) -> usize {
        self.layers
            .iter()
            .flatten()
            .map(LayerPast::seq_len)
            .next()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(Option::is_none)
    }

    /// Drops every cached prefix while keeping the layer count.
    pub fn reset(&mut self) {
        self.layers.iter_mut().for_each(|entry| *entry = None);
    }
}
