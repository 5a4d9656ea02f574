use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::{Mlp, ResidualBlock};
use crate::model::StripAttention;

/// Decoder-side block. `in_channels` is the width of the already-concatenated
/// input (current feature map plus the popped skip connection). The mixer and
/// attention stages only exist on the per-level channel-reduction block.
pub struct UpBlock {
  res: ResidualBlock,
  mlp: Option<Mlp>,
  att: Option<StripAttention>,
}

impl UpBlock {
  pub fn new(
    in_channels: usize,
    out_channels: usize,
    time_channels: Option<usize>,
    dropout: f32,
    use_mixer: bool,
    use_attention: bool,
    vb: VarBuilder,
  ) -> Result<Self, candle_core::Error> {
    let res = ResidualBlock::new(in_channels, out_channels, time_channels, dropout, vb.pp("res"))?;

    let mlp = if use_mixer {
      Some(Mlp::new(out_channels, vb.pp("mlp"))?)
    } else {
      None
    };

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

    if let Some(mlp) = &self.mlp {
      x = mlp.forward(&x)?;
    }

    if let Some(att) = &self.att {
      x = att.forward(&x)?;
    }

    Ok(x)
  }
}
