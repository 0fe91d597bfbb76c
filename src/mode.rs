use serde::{Deserialize, Serialize};

/// How pixel intensities are modelled.
///
/// The mode decides the number of output channels of the last layer, the
/// normalization applied to its output and the loss used to train it, so the
/// same value must be handed to both [PixelCnnConfig](crate::model::PixelCnnConfig)
/// and [PixelCrossEntropyConfig](crate::nn::loss::PixelCrossEntropyConfig).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// One Bernoulli variable per pixel (black or white), sigmoid output.
    Binary,
    /// A categorical distribution over the 256 intensity levels, softmax output.
    #[default]
    Multinomial,
}

impl Mode {
    /// Number of channels produced by the last convolution.
    pub fn num_classes(&self) -> usize {
        match self {
            Mode::Binary => 1,
            Mode::Multinomial => 256,
        }
    }

    /// Maps a raw 8-bit intensity to the class index the model must predict.
    pub fn target(&self, intensity: u8) -> i64 {
        match self {
            Mode::Binary => (intensity >= 128) as i64,
            Mode::Multinomial => intensity as i64,
        }
    }
}

impl core::fmt::Display for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Mode::Binary => f.write_str("binary"),
            Mode::Multinomial => f.write_str("256ary"),
        }
    }
}
