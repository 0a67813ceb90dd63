use anyhow::Result;
use attention::{AttentionError, KvCache};
use candle_core::{DType, Device, Tensor};
use layers::{InitializeParameters, Initializer};
use model::{DecoderBlock, Gpt2, Gpt2Args, ModelError, SubModule};
use static_assertions::assert_impl_all;

assert_impl_all!(Gpt2: Send, Sync, Clone);
assert_impl_all!(DecoderBlock: Send, Sync);
assert_impl_all!(ModelError: Send, Sync, std::error::Error);

fn small_args() -> Gpt2Args {
    Gpt2Args {
        nb_layer: 2,
        nb_head: 2,
        ..Gpt2Args::default()
    }
}

fn build(seq_len: usize, hidden: usize) -> Result<Gpt2> {
    Ok(Gpt2::new(
        &[seq_len, hidden],
        "gpt2",
        &small_args(),
        &Device::Cpu,
        DType::F32,
    )?)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?
        .abs()?
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .fold(0.0, f32::max))
}

fn flat(tensor: &Tensor) -> Result<Vec<f32>> {
    Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}

#[test]
fn forward_preserves_shape() -> Result<()> {
    let model = build(8, 16)?;
    assert_eq!(model.num_layers(), 2);
    assert_eq!(model.id(), "gpt2");
    assert_eq!(model.output_shape(), vec![8, 16]);
    assert_eq!(model.output_shape(), model.input_shape());

    let input = Tensor::randn(0f32, 1.0, (3, 5, 16), &Device::Cpu)?;
    let (output, state) = model.forward(&input, &model.new_internal_state())?;
    assert_eq!(output.dims(), &[3, 5, 16]);
    assert_eq!(output.dtype(), DType::F32);
    assert_eq!(state.num_layers(), 2);
    assert_eq!(state.seq_len(), 5);
    for entry in state.iter() {
        let entry = entry.expect("every layer caches its prefix");
        assert_eq!(entry.key().dims(), &[3, 2, 8, 5]);
        assert_eq!(entry.value().dims(), &[3, 2, 5, 8]);
    }
    Ok(())
}

#[test]
fn final_norm_standardises_each_position() -> Result<()> {
    let model = build(8, 16)?;
    let input = Tensor::randn(0f32, 3.0, (2, 4, 16), &Device::Cpu)?;
    let (output, _) = model.forward(&input, &model.new_internal_state())?;
    for row in flat(&output)?.chunks(16) {
        let mean = row.iter().sum::<f32>() / 16.0;
        let var = row.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 16.0;
        assert!(mean.abs() < 1e-4, "mean {mean}");
        assert!((var - 1.0).abs() < 1e-3, "variance {var}");
    }
    Ok(())
}

#[test]
fn token_by_token_decode_matches_full_pass() -> Result<()> {
    let model = build(8, 16)?;
    let input = Tensor::randn(0f32, 1.0, (2, 6, 16), &Device::Cpu)?;
    let (full, _) = model.forward(&input, &model.new_internal_state())?;

    let mut state = model.new_internal_state();
    let mut steps = Vec::new();
    for t in 0..6 {
        let (out, next) = model.forward(&input.narrow(1, t, 1)?, &state)?;
        assert_eq!(next.seq_len(), t + 1);
        steps.push(out);
        state = next;
    }
    let stepped = Tensor::cat(&steps, 1)?;
    let diff = max_abs_diff(&full, &stepped)?;
    assert!(diff < 1e-4, "incremental decode diverged by {diff}");
    Ok(())
}

#[test]
fn chunked_decode_matches_full_pass() -> Result<()> {
    let model = build(8, 16)?;
    let input = Tensor::randn(0f32, 1.0, (1, 7, 16), &Device::Cpu)?;
    let (full, _) = model.forward(&input, &model.new_internal_state())?;

    let (head, state) = model.forward(&input.narrow(1, 0, 4)?, &model.new_internal_state())?;
    let (tail, state) = model.forward(&input.narrow(1, 4, 3)?, &state)?;
    assert_eq!(state.seq_len(), 7);
    let diff = max_abs_diff(&full, &Tensor::cat(&[head, tail], 1)?)?;
    assert!(diff < 1e-4, "chunked decode diverged by {diff}");
    Ok(())
}

#[test]
fn earlier_outputs_ignore_later_inputs() -> Result<()> {
    let model = build(8, 16)?;
    let input = Tensor::randn(0f32, 1.0, (1, 6, 16), &Device::Cpu)?;
    let perturbed = Tensor::cat(
        &[
            input.narrow(1, 0, 3)?,
            Tensor::randn(0f32, 5.0, (1, 3, 16), &Device::Cpu)?,
        ],
        1,
    )?;
    let (a, _) = model.forward(&input, &model.new_internal_state())?;
    let (b, _) = model.forward(&perturbed, &model.new_internal_state())?;
    assert!(max_abs_diff(&a.narrow(1, 0, 3)?, &b.narrow(1, 0, 3)?)? < 1e-6);
    assert!(max_abs_diff(&a.narrow(1, 3, 3)?, &b.narrow(1, 3, 3)?)? > 1e-3);
    Ok(())
}

#[test]
fn forward_is_deterministic() -> Result<()> {
    let model = build(8, 16)?;
    let input = Tensor::randn(0f32, 1.0, (2, 5, 16), &Device::Cpu)?;
    let (a, _) = model.forward(&input, &model.new_internal_state())?;
    let (b, _) = model.forward(&input, &model.new_internal_state())?;
    assert_eq!(flat(&a)?, flat(&b)?);
    Ok(())
}

#[test]
fn blocks_are_initialised_independently() -> Result<()> {
    let model = build(8, 16)?;
    let first = model.blocks()[0].attn().c_attn().weight();
    let second = model.blocks()[1].attn().c_attn().weight();
    assert!(max_abs_diff(first, second)? > 1e-3);
    assert_eq!(model.blocks()[1].index(), 1);
    Ok(())
}

#[test]
fn initialisation_follows_gpt2_recipe() -> Result<()> {
    let mut model = Gpt2::new(
        &[4, 64],
        "stats",
        &Gpt2Args {
            nb_layer: 2,
            nb_head: 4,
            ..Gpt2Args::default()
        },
        &Device::Cpu,
        DType::F32,
    )?;
    model.initialize_parameters(&Initializer::gpt2())?;

    for block in model.blocks() {
        let weights = flat(block.mlp().c_fc().weight())?;
        let n = weights.len() as f32;
        let mean = weights.iter().sum::<f32>() / n;
        let std = (weights.iter().map(|w| (w - mean).powi(2)).sum::<f32>() / n).sqrt();
        assert!(mean.abs() < 2e-3, "mean {mean}");
        assert!((std - 0.02).abs() < 2e-3, "std {std}");

        let biases = [
            block.attn().c_attn().bias(),
            block.attn().c_proj().bias(),
            block.mlp().c_fc().bias(),
            block.mlp().c_proj().bias(),
        ];
        for bias in biases.into_iter().flatten() {
            assert!(flat(bias)?.iter().all(|b| *b == 0.0));
        }
        for norm in [block.ln_1(), block.ln_2()] {
            assert!(flat(norm.weight())?.iter().all(|w| *w == 1.0));
            assert!(flat(norm.bias())?.iter().all(|b| *b == 0.0));
        }
    }
    assert!(flat(model.ln_f().weight())?.iter().all(|w| *w == 1.0));
    Ok(())
}

#[test]
fn loaded_weights_take_effect() -> Result<()> {
    let mut model = build(8, 16)?;
    let zeros = Tensor::zeros((16, 16), DType::F32, &Device::Cpu)?;
    for block in model.blocks_mut() {
        block.attn_mut().c_proj_mut().copy_weight_from(&zeros)?;
    }

    // Without an attention contribution every position is processed on its own.
    let input = Tensor::randn(0f32, 1.0, (1, 4, 16), &Device::Cpu)?;
    let perturbed = Tensor::cat(
        &[
            Tensor::randn(0f32, 1.0, (1, 1, 16), &Device::Cpu)?,
            input.narrow(1, 1, 3)?,
        ],
        1,
    )?;
    let (a, _) = model.forward(&input, &model.new_internal_state())?;
    let (b, _) = model.forward(&perturbed, &model.new_internal_state())?;
    assert!(max_abs_diff(&a.narrow(1, 1, 3)?, &b.narrow(1, 1, 3)?)? < 1e-6);
    Ok(())
}

#[test]
fn indivisible_heads_fail_at_construction() {
    let err = Gpt2::new(
        &[8, 10],
        "bad",
        &Gpt2Args {
            nb_layer: 1,
            nb_head: 4,
            ..Gpt2Args::default()
        },
        &Device::Cpu,
        DType::F32,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ModelError::Attention(AttentionError::HeadsNotDivisible {
            hidden_size: 10,
            num_heads: 4
        })
    ));
}

#[test]
fn sequences_beyond_context_are_rejected() -> Result<()> {
    let model = build(4, 16)?;
    let input = Tensor::randn(0f32, 1.0, (1, 5, 16), &Device::Cpu)?;
    let err = model
        .forward(&input, &model.new_internal_state())
        .unwrap_err();
    assert!(matches!(
        err,
        ModelError::Attention(AttentionError::SequenceOutOfBounds {
            requested: 5,
            max_seq_len: 4
        })
    ));

    let (_, state) = model.forward(&input.narrow(1, 0, 4)?, &model.new_internal_state())?;
    let err = model
        .forward(&input.narrow(1, 4, 1)?, &state)
        .unwrap_err();
    assert!(matches!(
        err,
        ModelError::Attention(AttentionError::SequenceOutOfBounds { .. })
    ));
    Ok(())
}

#[test]
fn mismatched_state_is_rejected() -> Result<()> {
    let model = build(8, 16)?;
    let input = Tensor::randn(0f32, 1.0, (1, 2, 16), &Device::Cpu)?;
    let err = model.forward(&input, &KvCache::empty(3)).unwrap_err();
    assert!(matches!(err, ModelError::StateMismatch(_)));

    let other = Gpt2::new(
        &[8, 16],
        "other",
        &Gpt2Args {
            nb_layer: 2,
            nb_head: 4,
            ..Gpt2Args::default()
        },
        &Device::Cpu,
        DType::F32,
    )?;
    let (_, foreign) = other.forward(&input, &other.new_internal_state())?;
    let err = model.forward(&input, &foreign).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Attention(AttentionError::CacheMismatch { .. })
    ));
    Ok(())
}

#[test]
fn malformed_input_is_rejected() -> Result<()> {
    let model = build(8, 16)?;
    let wrong_width = Tensor::zeros((1, 2, 12), DType::F32, &Device::Cpu)?;
    assert!(matches!(
        model.forward(&wrong_width, &model.new_internal_state()),
        Err(ModelError::InvalidInput(_))
    ));
    let empty = Tensor::zeros((1, 0, 16), DType::F32, &Device::Cpu)?;
    assert!(matches!(
        model.forward(&empty, &model.new_internal_state()),
        Err(ModelError::InvalidInput(_))
    ));
    let flat_input = Tensor::zeros((2, 16), DType::F32, &Device::Cpu)?;
    assert!(matches!(
        model.forward(&flat_input, &model.new_internal_state()),
        Err(ModelError::InvalidInput(_))
    ));
    Ok(())
}

#[test]
fn half_precision_storage_round_trips_dtype() -> Result<()> {
    let model = Gpt2::new(&[8, 16], "bf16", &small_args(), &Device::Cpu, DType::BF16)?;
    let input = Tensor::randn(0f32, 1.0, (1, 3, 16), &Device::Cpu)?;
    let (output, state) = model.forward(&input, &model.new_internal_state())?;
    assert_eq!(output.dtype(), DType::BF16);
    assert!(flat(&output)?.iter().all(|v| v.is_finite()));
    assert_eq!(state.layer(0).map(|entry| entry.key().dtype()), Some(DType::BF16));
    Ok(())
}

fn run_sequence<M: SubModule>(module: &M, chunks: &[Tensor]) -> model::Result<Vec<Tensor>> {
    let mut state = module.new_internal_state();
    let mut outputs = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let (output, next) = module.forward(chunk, &state)?;
        outputs.push(output);
        state = next;
    }
    Ok(outputs)
}

#[test]
fn usable_through_submodule_trait() -> Result<()> {
    let model = build(8, 16)?;
    assert_eq!(SubModule::id(&model), "gpt2");
    assert_eq!(SubModule::output_shape(&model), vec![8, 16]);

    let input = Tensor::randn(0f32, 1.0, (1, 3, 16), &Device::Cpu)?;
    let chunks = [input.narrow(1, 0, 2)?, input.narrow(1, 2, 1)?];
    let outputs = run_sequence(&model, &chunks)?;
    let (full, _) = model.forward(&input, &model.new_internal_state())?;
    assert!(max_abs_diff(&full, &Tensor::cat(&outputs, 1)?)? < 1e-4);
    Ok(())
}

#[test]
fn args_file_drives_construction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("gpt2.json");
    std::fs::write(&path, r#"{"nb_layer": 3, "nb_head": 4, "layer_norm_eps": 1e-6}"#)?;
    let args = Gpt2Args::from_path(&path)?;

    let model = Gpt2::new(&[8, 16], "from-file", &args, &Device::Cpu, DType::F32)?;
    assert_eq!(model.num_layers(), 3);
    assert_eq!(model.config().n_heads, 4);
    assert_eq!(model.ln_f().config().epsilon, 1e-6);
    Ok(())
}
