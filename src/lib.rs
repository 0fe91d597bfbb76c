//! A PixelCNN-style autoregressive model of MNIST digits and its training loop,
//! built on the burn deep learning framework.

#[macro_use]
extern crate derive_new;

/// Command line interface of the `pixelcnn` binary.
pub mod cli;
/// MNIST batching and dataloaders.
pub mod data;
/// Error types.
pub mod error;
/// Application logging.
pub mod logger;
/// Network builder.
pub mod model;
/// Layers and losses.
pub mod nn;
/// Training configuration and the burn-train learner setup.
pub mod train;

mod mode;

pub use error::{PixelCnnError, Result};
pub use mode::Mode;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;

#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
