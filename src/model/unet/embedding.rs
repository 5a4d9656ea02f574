use candle_core::{DType, Module, Tensor, D};
use candle_nn::{linear, ops::silu, Linear, VarBuilder};

/// Maps a per-sample scalar timestep to a learned `[B, n_channels]` vector:
/// sinusoidal frequency bands followed by a two-layer transform.
pub struct TimeEmbedding {
  lin1: Linear,
  lin2: Linear,
  n_channels: usize,
}

impl TimeEmbedding {
  pub fn new(n_channels: usize, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    // half_dim = n_channels / 8 sine/cosine bands; a single band would put a
    // zero in the frequency-spacing denominator
    if n_channels % 8 != 0 || n_channels / 8 < 2 {
      return Err(
        candle_core::Error::Msg(format!(
          "time embedding channels must be a multiple of 8 and at least 16, got {n_channels}"
        ))
        .bt(),
      );
    }

    let lin1 = linear(n_channels / 4, n_channels, vb.pp("lin1"))?;
    let lin2 = linear(n_channels, n_channels, vb.pp("lin2"))?;

    Ok(Self {
      lin1,
      lin2,
      n_channels,
    })
  }
}

impl Module for TimeEmbedding {
  fn forward(&self, t: &Tensor) -> Result<Tensor, candle_core::Error> {
    let half_dim = self.n_channels / 8;
    let scale = f64::ln(10_000.) / (half_dim - 1) as f64;

    let freqs = (Tensor::arange(0, half_dim as u32, t.device())?.to_dtype(DType::F32)? * -scale)?
      .exp()?;

    let t = t.to_dtype(DType::F32)?;
    let emb = t.unsqueeze(D::Minus1)?.broadcast_mul(&freqs.unsqueeze(0)?)?;
    let emb = Tensor::cat(&[emb.sin()?, emb.cos()?], D::Minus1)?;

    let emb = silu(&self.lin1.forward(&emb)?)?;
    self.lin2.forward(&emb)
  }
}
