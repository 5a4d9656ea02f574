use candle_core::{Module, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};

use super::ResidualBlock;
use crate::model::StripAttention;
use crate::utils::dilated_pad;

/// Reference spatial size the dilated padding was tuned at. At stride 1 the
/// computed padding equals the dilation itself, so every runtime size is
/// preserved regardless of this constant.
const PAD_REF_SIZE: usize = 16;

const DILATIONS: [usize; 4] = [2, 4, 8, 16];

/// Bottleneck: a residual stage, a pyramid of dilated convolutions around a
/// strip-attention core, and a closing residual stage. Residual stages here
/// never receive time conditioning.
pub struct MiddleBlock {
  res1: ResidualBlock,
  dia1: Conv2d,
  dia2: Conv2d,
  att: StripAttention,
  dia3: Conv2d,
  dia4: Conv2d,
  res2: ResidualBlock,
}

fn dilated(channels: usize, dilation: usize, vb: VarBuilder) -> Result<Conv2d, candle_core::Error> {
  conv2d(
    channels,
    channels,
    3,
    Conv2dConfig {
      padding: dilated_pad(PAD_REF_SIZE, 3, 1, dilation),
      dilation,
      ..Default::default()
    },
    vb,
  )
}

impl MiddleBlock {
  pub fn new(channels: usize, dropout: f32, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    let res1 = ResidualBlock::new(channels, channels, None, dropout, vb.pp("res1"))?;
    let dia1 = dilated(channels, DILATIONS[0], vb.pp("dia1"))?;
    let dia2 = dilated(channels, DILATIONS[1], vb.pp("dia2"))?;
    let att = StripAttention::new(channels, vb.pp("att"))?;
    let dia3 = dilated(channels, DILATIONS[2], vb.pp("dia3"))?;
    let dia4 = dilated(channels, DILATIONS[3], vb.pp("dia4"))?;
    let res2 = ResidualBlock::new(channels, channels, None, dropout, vb.pp("res2"))?;

    Ok(Self {
      res1,
      dia1,
      dia2,
      att,
      dia3,
      dia4,
      res2,
    })
  }

  pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor, candle_core::Error> {
    let mut x = self.res1.forward(x, None, train)?;
    x = self.dia1.forward(&x)?;
    x = self.dia2.forward(&x)?;

    x = self.att.forward(&x)?;

    x = self.dia3.forward(&x)?;
    x = self.dia4.forward(&x)?;
    self.res2.forward(&x, None, train)
  }
}
