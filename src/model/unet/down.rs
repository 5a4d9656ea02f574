use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::{Mlp, ResidualBlock};
use crate::model::StripAttention;

/// Encoder-side block: residual stage, channel mixer, and strip attention at
/// the deeper resolutions.
pub struct DownBlock {
  res: ResidualBlock,
  mlp: Mlp,
  att: Option<StripAttention>,
}

impl DownBlock {
  pub fn new(
    in_channels: usize,
    out_channels: usize,
    time_channels: Option<usize>,
    dropout: f32,
    use_attention: bool,
    vb: VarBuilder,
  ) -> Result<Self, candle_core::Error> {
    let res = ResidualBlock::new(in_channels, out_channels, time_channels, dropout, vb.pp("res"))?;
    let mlp = Mlp::new(out_channels, vb.pp("mlp"))?;

    let att = if use_attention {
      Some(StripAttention::new(out_channels, vb.pp("att"))?)
    } else {
      None
    };

    Ok(Self { res, mlp, att })
  }

  pub fn forward(
    &self,
    x: &Tensor,
    t: Option<&Tensor>,
    train: bool,
  ) -> Result<Tensor, candle_core::Error> {
    let mut x = self.res.forward(x, t, train)?;
    x = self.mlp.forward(&x)?;

    if let Some(att) = &self.att {
      x = att.forward(&x)?;
    }

    Ok(x)
  }
}
