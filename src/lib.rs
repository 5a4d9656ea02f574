//! Conditional U-Net denoiser for diffusion-style image restoration.
//!
//! This crate defines the network architecture only: construction from a
//! [`DenoiserUNetConfig`] and a candle `VarBuilder`, and a forward pass from a
//! `[B, C, H, W]` image (plus an optional per-sample timestep) to a restored
//! image of the same spatial size. Training loops, noise schedules and
//! checkpoint handling belong to the surrounding harness.

mod model;
mod utils;

pub use model::*;
