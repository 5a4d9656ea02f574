use candle_core::{Module, Tensor};
use candle_nn::{conv2d, ops::silu, Conv2d, Conv2dConfig, VarBuilder};
use smallvec::SmallVec;

use super::unet::{DownBlock, Downsample, MiddleBlock, TimeEmbedding, UpBlock, Upsample};

/// Resolution levels at or below this depth run without strip attention;
/// attention cost scales badly with spatial extent.
const ATTENTION_MIN_DEPTH: usize = 2;

/// Construction parameters for [`DenoiserUNet`]. The defaults reproduce the
/// two-channel restoration setup this architecture was designed around.
#[derive(Debug, Clone)]
pub struct DenoiserUNetConfig {
  pub in_channels: usize,
  pub out_channels: usize,
  /// Base feature width; level `i` is `n_channels * ch_mults[i]` wide.
  pub n_channels: usize,
  pub ch_mults: Vec<usize>,
  /// Down/up blocks per resolution level.
  pub n_blocks: usize,
  /// Condition the network on a per-sample diffusion timestep.
  pub is_noise: bool,
  pub dropout: f32,
}

impl Default for DenoiserUNetConfig {
  fn default() -> Self {
    Self {
      in_channels: 2,
      out_channels: 1,
      n_channels: 32,
      ch_mults: vec![1, 2, 2, 4],
      n_blocks: 2,
      is_noise: true,
      dropout: 0.1,
    }
  }
}

enum DownStage {
  Block(DownBlock),
  Sample(Downsample),
}

enum UpStage {
  Block(UpBlock),
  Sample(Upsample),
}

/// Conditional U-Net denoiser: an encoder stack feeding a dilated-convolution
/// bottleneck, then a decoder stack consuming one skip connection per block.
pub struct DenoiserUNet {
  image_proj: Conv2d,
  time_emb: Option<TimeEmbedding>,
  down: Vec<DownStage>,
  middle: MiddleBlock,
  up: Vec<UpStage>,
  final_conv: Conv2d,
  n_resolutions: usize,
  span: tracing::Span,
}

impl DenoiserUNet {
  pub fn new(cfg: DenoiserUNetConfig, vb: VarBuilder) -> Result<Self, candle_core::Error> {
    if cfg.ch_mults.is_empty() {
      return Err(
        candle_core::Error::Msg("at least one channel multiplier is required".to_owned()).bt(),
      );
    }

    if cfg.ch_mults.iter().any(|&mult| mult == 0) {
      return Err(candle_core::Error::Msg("channel multipliers must be positive".to_owned()).bt());
    }

    if cfg.n_blocks == 0 {
      return Err(candle_core::Error::Msg("n_blocks must be at least 1".to_owned()).bt());
    }

    let n_resolutions = cfg.ch_mults.len();
    let time_channels = cfg.is_noise.then_some(cfg.n_channels * 4);

    let time_emb = match time_channels {
      Some(time_channels) => Some(TimeEmbedding::new(time_channels, vb.pp("time_emb"))?),
      None => None,
    };

    let conv_cfg = Conv2dConfig {
      padding: 1,
      ..Default::default()
    };

    let image_proj = conv2d(cfg.in_channels, cfg.n_channels, 3, conv_cfg, vb.pp("image_proj"))?;

    // Widths of the skip connections the forward pass will record, in push
    // order: one for the image projection, one after every down stage.
    let mut skip_widths: Vec<usize> = vec![cfg.n_channels];

    let vb_down = vb.pp("down");
    let mut down = Vec::new();
    let mut in_channels = cfg.n_channels;

    for (i, &mult) in cfg.ch_mults.iter().enumerate() {
      let out_channels = cfg.n_channels * mult;

      for _ in 0..cfg.n_blocks {
        down.push(DownStage::Block(DownBlock::new(
          in_channels,
          out_channels,
          time_channels,
          cfg.dropout,
          i >= ATTENTION_MIN_DEPTH,
          vb_down.pp(down.len().to_string()),
        )?));
        in_channels = out_channels;
        skip_widths.push(out_channels);
      }

      if i + 1 < n_resolutions {
        down.push(DownStage::Sample(Downsample::new(
          in_channels,
          vb_down.pp(down.len().to_string()),
        )?));
        skip_widths.push(in_channels);
      }
    }

    let middle = MiddleBlock::new(in_channels, cfg.dropout, vb.pp("middle"))?;

    let vb_up = vb.pp("up");
    let mut up = Vec::new();

    for i in (0..n_resolutions).rev() {
      let out_channels = cfg.n_channels * cfg.ch_mults[i];

      // each block consumes its skip channel-wise, so its residual stage is
      // sized from the current width plus the width it will pop
      for _ in 0..cfg.n_blocks {
        let skip = pop_skip(&mut skip_widths)?;
        up.push(UpStage::Block(UpBlock::new(
          in_channels + skip,
          out_channels,
          time_channels,
          cfg.dropout,
          false,
          false,
          vb_up.pp(up.len().to_string()),
        )?));
        in_channels = out_channels;
      }

      // channel-reduction block, the one decoder spot where mixing is always on
      let skip = pop_skip(&mut skip_widths)?;
      up.push(UpStage::Block(UpBlock::new(
        in_channels + skip,
        out_channels,
        time_channels,
        cfg.dropout,
        true,
        i >= ATTENTION_MIN_DEPTH,
        vb_up.pp(up.len().to_string()),
      )?));

      if i > 0 {
        up.push(UpStage::Sample(Upsample::new(
          in_channels,
          vb_up.pp(up.len().to_string()),
        )?));
      }
    }

    if !skip_widths.is_empty() {
      return Err(
        candle_core::Error::Msg(format!(
          "down/up stack mismatch: {} skip connections never consumed",
          skip_widths.len()
        ))
        .bt(),
      );
    }

    let final_conv = conv2d(in_channels, cfg.out_channels, 3, conv_cfg, vb.pp("final"))?;

    tracing::debug!(
      down = down.len(),
      up = up.len(),
      resolutions = n_resolutions,
      conditioned = cfg.is_noise,
      "built denoiser u-net"
    );

    Ok(Self {
      image_proj,
      time_emb,
      down,
      middle,
      up,
      final_conv,
      n_resolutions,
      span: tracing::span!(tracing::Level::TRACE, "denoiser-unet"),
    })
  }

  /// Eval-mode forward. `x` is `[B, in_channels, H, W]` with H and W divisible
  /// by `2^(levels - 1)`; `t` is a `[B]` timestep batch, required exactly when
  /// the model was built with `is_noise`.
  pub fn forward(&self, x: &Tensor, t: Option<&Tensor>) -> Result<Tensor, candle_core::Error> {
    self.forward_t(x, t, false)
  }

  pub fn forward_t(
    &self,
    x: &Tensor,
    t: Option<&Tensor>,
    train: bool,
  ) -> Result<Tensor, candle_core::Error> {
    let _enter = self.span.enter();

    let (_b, _c, h, w) = x.shape().dims4()?;
    let factor = 1 << (self.n_resolutions - 1);

    if h % factor != 0 || w % factor != 0 {
      return Err(
        candle_core::Error::Msg(format!(
          "input spatial size {h}x{w} is not divisible by the {factor}x down/up chain"
        ))
        .bt(),
      );
    }

    let t = match (&self.time_emb, t) {
      (Some(time_emb), Some(t)) => Some(time_emb.forward(t)?),
      (None, None) => None,
      (Some(_), None) => {
        return Err(
          candle_core::Error::Msg("this model is conditioned: a timestep is required".to_owned())
            .bt(),
        )
      }
      (None, Some(_)) => {
        return Err(
          candle_core::Error::Msg(
            "timestep passed to a model built without conditioning".to_owned(),
          )
          .bt(),
        )
      }
    };
    let t = t.as_ref();

    let mut x = self.image_proj.forward(x)?;

    let mut skips: SmallVec<[Tensor; 16]> = SmallVec::new();
    skips.push(x.clone());

    for stage in &self.down {
      x = match stage {
        DownStage::Block(block) => block.forward(&x, t, train)?,
        DownStage::Sample(sample) => sample.forward(&x)?,
      };
      skips.push(x.clone());
    }

    x = self.middle.forward(&x, train)?;

    for stage in &self.up {
      x = match stage {
        UpStage::Block(block) => {
          let Some(skip) = skips.pop() else {
            return Err(
              candle_core::Error::Msg(
                "skip stack exhausted before the up stack finished".to_owned(),
              )
              .bt(),
            );
          };

          block.forward(&Tensor::cat(&[&x, &skip], 1)?, t, train)?
        }
        UpStage::Sample(sample) => sample.forward(&x)?,
      };
    }

    if !skips.is_empty() {
      return Err(
        candle_core::Error::Msg(format!(
          "{} skip connections left unconsumed after decoding",
          skips.len()
        ))
        .bt(),
      );
    }

    self.final_conv.forward(&silu(&x)?)
  }
}

fn pop_skip(skip_widths: &mut Vec<usize>) -> Result<usize, candle_core::Error> {
  skip_widths.pop().ok_or_else(|| {
    candle_core::Error::Msg("down/up stack mismatch: ran out of skip connections".to_owned()).bt()
  })
}
