use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use strip_denoiser::{DenoiserUNet, DenoiserUNetConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn init_tracing() {
  let subscriber = FmtSubscriber::builder()
    .with_max_level(Level::INFO)
    .with_target(false)
    .finish();

  let _ = tracing::subscriber::set_global_default(subscriber);
}

fn random_model(cfg: DenoiserUNetConfig, device: &Device) -> Result<DenoiserUNet> {
  let varmap = VarMap::new();
  let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
  Ok(DenoiserUNet::new(cfg, vb)?)
}

fn assert_finite(t: &Tensor) -> Result<()> {
  let v = t.flatten_all()?.to_vec1::<f32>()?;
  assert!(v.iter().all(|x| x.is_finite()), "output contains NaN/Inf");
  Ok(())
}

#[test]
fn denoises_64x64_with_timestep() -> Result<()> {
  init_tracing();

  let device = Device::Cpu;
  let model = random_model(DenoiserUNetConfig::default(), &device)?;

  let x = Tensor::randn(0f32, 1., (1, 2, 64, 64), &device)?;
  let t = Tensor::new(&[5f32], &device)?;
  let y = model.forward(&x, Some(&t))?;

  assert_eq!(y.shape().dims4()?, (1, 1, 64, 64));
  assert_finite(&y)
}

#[test]
fn output_shape_tracks_input_across_configs() -> Result<()> {
  let device = Device::Cpu;

  let cases: [(Vec<usize>, usize, usize); 3] =
    [(vec![1], 1, 8), (vec![1, 2], 2, 16), (vec![1, 2, 2, 4], 1, 32)];

  for (ch_mults, n_blocks, size) in cases {
    let cfg = DenoiserUNetConfig {
      ch_mults,
      n_blocks,
      ..Default::default()
    };
    let model = random_model(cfg, &device)?;

    let x = Tensor::randn(0f32, 1., (1, 2, size, size), &device)?;
    let t = Tensor::new(&[3f32], &device)?;
    let y = model.forward(&x, Some(&t))?;

    // completing the pass also means every recorded skip was consumed
    assert_eq!(y.shape().dims4()?, (1, 1, size, size));
  }

  Ok(())
}

#[test]
fn unconditioned_model_takes_no_timestep() -> Result<()> {
  let device = Device::Cpu;
  let cfg = DenoiserUNetConfig {
    ch_mults: vec![1, 2],
    n_blocks: 1,
    is_noise: false,
    ..Default::default()
  };
  let model = random_model(cfg, &device)?;

  let x = Tensor::randn(0f32, 1., (1, 2, 16, 16), &device)?;
  let y = model.forward(&x, None)?;
  assert_eq!(y.shape().dims4()?, (1, 1, 16, 16));

  let t = Tensor::new(&[5f32], &device)?;
  assert!(model.forward(&x, Some(&t)).is_err());
  Ok(())
}

#[test]
fn conditioned_model_requires_timestep() -> Result<()> {
  let device = Device::Cpu;
  let cfg = DenoiserUNetConfig {
    ch_mults: vec![1, 2],
    n_blocks: 1,
    ..Default::default()
  };
  let model = random_model(cfg, &device)?;

  let x = Tensor::randn(0f32, 1., (1, 2, 16, 16), &device)?;
  assert!(model.forward(&x, None).is_err());
  Ok(())
}

#[test]
fn integer_timesteps_are_accepted() -> Result<()> {
  let device = Device::Cpu;
  let cfg = DenoiserUNetConfig {
    ch_mults: vec![1, 2],
    n_blocks: 1,
    ..Default::default()
  };
  let model = random_model(cfg, &device)?;

  let x = Tensor::randn(0f32, 1., (1, 2, 16, 16), &device)?;
  let t = Tensor::new(&[5u32], &device)?;
  let y = model.forward(&x, Some(&t))?;

  assert_eq!(y.shape().dims4()?, (1, 1, 16, 16));
  Ok(())
}

#[test]
fn training_mode_forward_runs_dropout() -> Result<()> {
  let device = Device::Cpu;
  let cfg = DenoiserUNetConfig {
    ch_mults: vec![1, 2],
    n_blocks: 1,
    ..Default::default()
  };
  let model = random_model(cfg, &device)?;

  let x = Tensor::randn(0f32, 1., (1, 2, 16, 16), &device)?;
  let t = Tensor::new(&[7f32], &device)?;
  let y = model.forward_t(&x, Some(&t), true)?;

  assert_eq!(y.shape().dims4()?, (1, 1, 16, 16));
  assert_finite(&y)
}

#[test]
fn rejects_indivisible_spatial_sizes() -> Result<()> {
  let device = Device::Cpu;
  let cfg = DenoiserUNetConfig {
    ch_mults: vec![1, 2, 2],
    n_blocks: 1,
    ..Default::default()
  };
  let model = random_model(cfg, &device)?;

  // three levels need spatial sizes divisible by 4
  let x = Tensor::randn(0f32, 1., (1, 2, 18, 18), &device)?;
  let t = Tensor::new(&[5f32], &device)?;
  assert!(model.forward(&x, Some(&t)).is_err());
  Ok(())
}

#[test]
fn rejects_invalid_configurations() {
  let device = Device::Cpu;

  let build = |cfg: DenoiserUNetConfig| {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    DenoiserUNet::new(cfg, vb)
  };

  assert!(build(DenoiserUNetConfig {
    ch_mults: vec![],
    ..Default::default()
  })
  .is_err());

  assert!(build(DenoiserUNetConfig {
    ch_mults: vec![1, 0, 2],
    ..Default::default()
  })
  .is_err());

  assert!(build(DenoiserUNetConfig {
    n_blocks: 0,
    ..Default::default()
  })
  .is_err());

  // base width not divisible by the normalization group count
  assert!(build(DenoiserUNetConfig {
    n_channels: 20,
    ..Default::default()
  })
  .is_err());
}
