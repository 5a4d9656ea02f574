use candle_core::{Module, Tensor, D};
use candle_nn::{
  conv2d, linear, ops::silu, Conv2d, Conv2dConfig, Dropout, GroupNorm, Linear, VarBuilder,
};

use super::normalize;

/// Two normalize-activate-convolve stages with an optional additive timestep
/// injection and a shape-matching shortcut path.
pub struct ResidualBlock {
  norm1: GroupNorm,
  conv1: Conv2d,
  norm2: GroupNorm,
  conv2: Conv2d,
  time_emb: Option<Linear>,
  shortcut: Option<Conv2d>,
  dropout: Dropout,
  span: tracing::Span,
}

impl ResidualBlock {
  pub fn new(
    in_channels: usize,
    out_channels: usize,
    time_channels: Option<usize>,
    dropout: f32,
    vb: VarBuilder,
  ) -> Result<Self, candle_core::Error> {
    let cfg = Conv2dConfig {
      padding: 1,
      ..Default::default()
    };

    let norm1 = normalize(in_channels, vb.pp("norm1"))?;
    let conv1 = conv2d(in_channels, out_channels, 3, cfg, vb.pp("conv1"))?;
    let norm2 = normalize(out_channels, vb.pp("norm2"))?;
    let conv2 = conv2d(out_channels, out_channels, 3, cfg, vb.pp("conv2"))?;

    let shortcut = if in_channels != out_channels {
      Some(conv2d(
        in_channels,
        out_channels,
        1,
        Conv2dConfig::default(),
        vb.pp("shortcut"),
      )?)
    } else {
      None
    };

    let time_emb = match time_channels {
      Some(time_channels) => Some(linear(time_channels, out_channels, vb.pp("time_emb"))?),
      None => None,
    };

    Ok(Self {
      norm1,
      conv1,
      norm2,
      conv2,
      time_emb,
      shortcut,
      dropout: Dropout::new(dropout),
      span: tracing::span!(tracing::Level::TRACE, "residual-block"),
    })
  }

  /// `x` is `[B, in_channels, H, W]`; `t` must be `Some([B, time_channels])`
  /// exactly when the block was built with conditioning.
  pub fn forward(
    &self,
    x: &Tensor,
    t: Option<&Tensor>,
    train: bool,
  ) -> Result<Tensor, candle_core::Error> {
    let _enter = self.span.enter();

    let mut h = self.conv1.forward(&silu(&self.norm1.forward(x)?)?)?;

    h = match (t, &self.time_emb) {
      (Some(t), Some(time_emb)) => {
        let emb = time_emb.forward(&silu(t)?)?;
        h.broadcast_add(&emb.unsqueeze(D::Minus1)?.unsqueeze(D::Minus1)?)?
      }
      (None, None) => h,
      (Some(_), None) => {
        return Err(
          candle_core::Error::Msg("timestep passed to a block built without conditioning".to_owned())
            .bt(),
        )
      }
      (None, Some(_)) => {
        return Err(
          candle_core::Error::Msg("conditioned block called without a timestep".to_owned()).bt(),
        )
      }
    };

    h = self
      .conv2
      .forward(&self.dropout.forward(&silu(&self.norm2.forward(&h)?)?, train)?)?;

    match &self.shortcut {
      Some(shortcut) => h + shortcut.forward(x)?,
      None => h + x,
    }
  }
}
