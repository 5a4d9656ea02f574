use candle_core::{Module, Tensor};
use candle_nn::{
  conv2d, conv_transpose2d, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
  VarBuilder,
};

/// Doubles the spatial extent with a 4x4 stride-2 transposed convolution.
pub struct Upsample {
  conv: ConvTranspose2d,
}

impl Upsample {
  pub fn new(channels: usize, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    let conv = conv_transpose2d(
      channels,
      channels,
      4,
      ConvTranspose2dConfig {
        padding: 1,
        stride: 2,
        ..Default::default()
      },
      vb.pp("conv"),
    )?;

    Ok(Self { conv })
  }
}

impl Module for Upsample {
  fn forward(&self, x: &Tensor) -> Result<Tensor, candle_core::Error> {
    self.conv.forward(x)
  }
}

/// Halves the spatial extent with a 3x3 stride-2 convolution; an odd extent
/// `n` maps to `(n + 1) / 2`.
pub struct Downsample {
  conv: Conv2d,
}

impl Downsample {
  pub fn new(channels: usize, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    let conv = conv2d(
      channels,
      channels,
      3,
      Conv2dConfig {
        padding: 1,
        stride: 2,
        ..Default::default()
      },
      vb.pp("conv"),
    )?;

    Ok(Self { conv })
  }
}

impl Module for Downsample {
  fn forward(&self, x: &Tensor) -> Result<Tensor, candle_core::Error> {
    self.conv.forward(x)
  }
}
