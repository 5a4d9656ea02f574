mod attention;
mod denoiser;
mod unet;

pub use attention::*;
pub use denoiser::*;
pub use unet::*;
