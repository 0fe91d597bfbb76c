use std::path::PathBuf;

use burn::config::ConfigError;
use burn::record::RecorderError;

use crate::mode::Mode;
use crate::train::Split;

/// Result type alias used throughout the crate.
pub type Result<T, E = PixelCnnError> = std::result::Result<T, E>;

/// Errors raised while building, training or restoring a PixelCNN.
#[derive(thiserror::Error, Debug)]
pub enum PixelCnnError {
    /// Two consecutive layers do not agree on the number of channels.
    #[error(
        "channel mismatch between layer {index} and {next}: {channels_out} output channels, {next_channels_in} input channels",
        next = .index + 1
    )]
    ChannelMismatch {
        index: usize,
        channels_out: usize,
        next_channels_in: usize,
    },

    /// A residual connection was requested around a layer that changes the channel count.
    #[error(
        "layer {index} cannot carry a residual connection: {channels_in} input channels, {channels_out} output channels"
    )]
    InvalidResidual {
        index: usize,
        channels_in: usize,
        channels_out: usize,
    },

    /// The last layer does not produce one channel per class.
    #[error("the last layer must produce {expected} channels in {mode} mode, got {actual}")]
    ClassCountMismatch {
        mode: Mode,
        expected: usize,
        actual: usize,
    },

    /// The network was requested without any layer.
    #[error("a network needs at least one layer specification")]
    EmptyNetwork,

    /// The loss diverged.
    #[error("non-finite {split} loss ({value}) at epoch {epoch}")]
    NonFiniteLoss {
        split: Split,
        epoch: usize,
        value: f64,
    },

    /// Resuming was requested but the artifact directory holds no checkpoint.
    #[error("no checkpoint found in {0}")]
    NoCheckpoint(PathBuf),

    #[error("record error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
