mod down;
mod embedding;
mod middle;
mod mlp;
mod residual;
mod sample;
mod up;

use candle_nn::{group_norm, GroupNorm, VarBuilder};

pub use down::*;
pub use embedding::*;
pub use middle::*;
pub use mlp::*;
pub use residual::*;
pub use sample::*;
pub use up::*;

pub(crate) const NORM_GROUPS: usize = 32;
pub(crate) const NORM_EPS: f64 = 1e-6;

/// Fixed-group channel normalization shared by every block in the network.
/// The channel count must be divisible by the group count.
pub(crate) fn normalize(channels: usize, vb: VarBuilder) -> Result<GroupNorm, candle_core::Error> {
  if channels % NORM_GROUPS != 0 {
    return Err(
      candle_core::Error::Msg(format!(
        "channel count {channels} is not divisible by the {NORM_GROUPS} normalization groups"
      ))
      .bt(),
    );
  }

  group_norm(NORM_GROUPS, channels, NORM_EPS, vb)
}
