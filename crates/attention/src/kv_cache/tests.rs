use super::{KvCache, LayerPast};
use crate::core::AttentionError;
use candle_core::{DType, Device, Tensor};
use static_assertions::assert_impl_all;

assert_impl_all!(LayerPast: Send, Sync, Clone);
assert_impl_all!(KvCache: Send, Sync, Clone, Default);

fn allclose(a: &Tensor, b: &Tensor, tol: f32) {
    let max = a
        .to_dtype(DType::F32)
        .unwrap()
        .sub(&b.to_dtype(DType::F32).unwrap())
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap()
        .into_iter()
        .fold(0.0_f32, f32::max);
    assert!(max <= tol, "max diff {max} exceeded tolerance {tol}");
}

fn random_entry(device: &Device, heads: usize, len: usize) -> LayerPast {
    let key = Tensor::rand(0.0f32, 1.0, (2, heads, 4, len), device).unwrap();
    let value = Tensor::rand(0.0f32, 1.0, (2, heads, len, 4), device).unwrap();
    LayerPast::new(key, value).unwrap()
}

#[test]
fn extend_appends_along_sequence_axes() {
    let device = Device::Cpu;
    let prefix = random_entry(&device, 3, 5);
    let step = random_entry(&device, 3, 1);

    let extended = prefix.extend(step.key(), step.value()).unwrap();
    assert_eq!(extended.seq_len(), 6);
    assert_eq!(extended.key().dims(), &[2, 3, 4, 6]);
    assert_eq!(extended.value().dims(), &[2, 3, 6, 4]);

    allclose(&extended.key().narrow(3, 0, 5).unwrap(), prefix.key(), 0.0);
    allclose(&extended.key().narrow(3, 5, 1).unwrap(), step.key(), 0.0);
    allclose(&extended.value().narrow(2, 0, 5).unwrap(), prefix.value(), 0.0);
    allclose(&extended.value().narrow(2, 5, 1).unwrap(), step.value(), 0.0);

    // The source snapshot is untouched.
    assert_eq!(prefix.seq_len(), 5);
}

#[test]
fn extend_rejects_mismatched_heads() {
    let device = Device::Cpu;
    let prefix = random_entry(&device, 3, 2);
    let other = random_entry(&device, 2, 1);
    let err = prefix.extend(other.key(), other.value()).unwrap_err();
    assert!(matches!(err, AttentionError::CacheMismatch { .. }));
}

#[test]
fn new_rejects_inconsistent_key_value() {
    let device = Device::Cpu;
    let key = Tensor::zeros((1, 2, 4, 3), DType::F32, &device).unwrap();
    let value = Tensor::zeros((1, 2, 2, 4), DType::F32, &device).unwrap();
    assert!(matches!(
        LayerPast::new(key.clone(), value),
        Err(AttentionError::CacheMismatch { .. })
    ));

    let flat = Tensor::zeros((2, 4, 3), DType::F32, &device).unwrap();
    assert!(LayerPast::new(flat, key).is_err());
}

#[test]
fn empty_cache_reports_no_prefix() {
    let cache = KvCache::empty(3);
    assert_eq!(cache.num_layers(), 3);
    assert!(cache.is_empty());
    assert_eq!(cache.seq_len(), 0);
    assert!(cache.iter().all(|entry| entry.is_none()));
    assert!(cache.layer(7).is_none());
}

#[test]
fn from_layers_tracks_length_and_resets() {
    let device = Device::Cpu;
    let mut cache = KvCache::from_layers(vec![
        Some(random_entry(&device, 2, 4)),
        Some(random_entry(&device, 2, 4)),
    ])
    .unwrap();
    assert_eq!(cache.seq_len(), 4);
    assert!(!cache.is_empty());
    assert_eq!(cache.layer(1).map(LayerPast::num_heads), Some(2));

    cache.reset();
    assert!(cache.is_empty());
    assert_eq!(cache.num_layers(), 2);
}

#[test]
fn from_layers_rejects_ragged_prefixes() {
    let device = Device::Cpu;
    let err = KvCache::from_layers(vec![
        Some(random_entry(&device, 2, 4)),
        Some(random_entry(&device, 2, 3)),
    ])
    .unwrap_err();
    assert!(matches!(err, AttentionError::CacheMismatch { .. }));

    let err = KvCache::from_layers(vec![Some(random_entry(&device, 2, 1)), None]).unwrap_err();
    assert!(matches!(err, AttentionError::CacheMismatch { .. }));
}
