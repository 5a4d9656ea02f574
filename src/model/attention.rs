use candle_core::{Module, Tensor, D};
use candle_nn::{linear, ops::softmax, GroupNorm, Linear, VarBuilder};

use super::unet::normalize;

/// Strip attention over a `[B, C, H, W]` feature map: every position attends
/// within its horizontal strip, then within its vertical strip. Long-range
/// spatial mixing without the quadratic cost of full 2d attention.
pub struct StripAttention {
  norm: GroupNorm,
  query: Linear,
  key: Linear,
  value: Linear,
  proj: Linear,
  channels: usize,
  span: tracing::Span,
}

impl StripAttention {
  pub fn new(channels: usize, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    let norm = normalize(channels, vb.pp("norm"))?;
    let query = linear(channels, channels, vb.pp("query"))?;
    let key = linear(channels, channels, vb.pp("key"))?;
    let value = linear(channels, channels, vb.pp("value"))?;
    let proj = linear(channels, channels, vb.pp("proj"))?;

    Ok(Self {
      norm,
      query,
      key,
      value,
      proj,
      channels,
      span: tracing::span!(tracing::Level::TRACE, "strip-attn"),
    })
  }

  // `xs` is `[n, t, c]`, attends over `t`
  fn attend(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
    let q = self.query.forward(xs)?;
    let k = self.key.forward(xs)?;
    let v = self.value.forward(xs)?;

    let scale = (self.channels as f64).powf(-0.5);
    let att = softmax(&(q.matmul(&k.t()?)? * scale)?, D::Minus1)?;
    att.matmul(&v)
  }
}

impl Module for StripAttention {
  fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
    let _enter = self.span.enter();
    let (b, c, h, w) = xs.shape().dims4()?;

    let hx = self.norm.forward(xs)?;
    let hx = hx.permute((0, 2, 3, 1))?.contiguous()?;

    let hx = self.attend(&hx.reshape((b * h, w, c))?)?;
    let hx = hx.reshape((b, h, w, c))?.transpose(1, 2)?.contiguous()?;
    let hx = self.attend(&hx.reshape((b * w, h, c))?)?;

    let hx = self.proj.forward(&hx)?;
    let hx = hx.reshape((b, w, h, c))?.permute((0, 3, 2, 1))?.contiguous()?;

    hx + xs
  }
}
