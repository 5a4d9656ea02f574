use candle_core::{Module, Tensor};
use candle_nn::{
  conv2d, layer_norm, linear, seq, Activation, Conv2d, Conv2dConfig, Sequential, VarBuilder,
};

const FORWARD_EXPANSION: usize = 2;

/// Per-position channel mixer with a residual add. The 3x3 convolution is
/// shared between the pre- and post-mixing passes.
pub struct Mlp {
  conv: Conv2d,
  fc: Sequential,
}

impl Mlp {
  pub fn new(channels: usize, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    let conv = conv2d(
      channels,
      channels,
      3,
      Conv2dConfig {
        padding: 1,
        ..Default::default()
      },
      vb.pp("conv"),
    )?;

    let mut fc = seq();
    fc = fc.add(layer_norm(channels, 1e-5, vb.pp("fc.0"))?);
    fc = fc.add(linear(channels, FORWARD_EXPANSION * channels, vb.pp("fc.1"))?);
    fc = fc.add(Activation::Relu);
    fc = fc.add(linear(FORWARD_EXPANSION * channels, channels, vb.pp("fc.3"))?);
    fc = fc.add(layer_norm(channels, 1e-5, vb.pp("fc.4"))?);

    Ok(Self { conv, fc })
  }
}

impl Module for Mlp {
  fn forward(&self, x: &Tensor) -> Result<Tensor, candle_core::Error> {
    let (b, c, h, w) = x.shape().dims4()?;

    let mut hx = self.conv.forward(x)?;
    hx = hx.flatten_from(2)?.transpose(1, 2)?;
    hx = self.fc.forward(&hx)?;
    hx = hx.transpose(1, 2)?.contiguous()?.reshape((b, c, h, w))?;
    hx = self.conv.forward(&hx)?;

    hx + x
  }
}
