use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{Initializer, Relu},
    tensor::{
        activation::{sigmoid, softmax},
        backend::Backend,
        Tensor,
    },
};

use crate::{
    error::{PixelCnnError, Result},
    mode::Mode,
    nn::{MaskedConv2d, MaskedConv2dConfig},
};

/// One convolution of the stack: `(kernel_size, channels_out, channels_in)`.
#[derive(Config, Debug, PartialEq)]
pub struct LayerSpec {
    pub kernel_size: [usize; 2],
    pub channels_out: usize,
    pub channels_in: usize,
    /// Whether a rectifier follows the convolution.
    #[config(default = true)]
    pub rectify: bool,
    /// Whether the block input is added to its output.
    #[config(default = false)]
    pub residual: bool,
}

#[derive(Config, Debug)]
pub struct PixelCnnConfig {
    #[config(default = "Mode::Multinomial")]
    pub mode: Mode,
    /// Channels of the input images.
    #[config(default = 1)]
    pub channels: usize,
    /// Height and width of the (square) input images.
    #[config(default = 28)]
    pub image_size: usize,
    /// Number of repeated 3x3 blocks between the 7x7 head and the tail.
    #[config(default = 6)]
    pub num_layers: usize,
    /// Width of the head and of the repeated blocks. The tail widens to twice
    /// and four times this value before projecting to the classes.
    #[config(default = 32)]
    pub hidden_channels: usize,
    /// Add skip connections around the repeated blocks.
    #[config(default = false)]
    pub residual: bool,
    #[config(default = false)]
    pub flip_filters: bool,
    #[config(default = false)]
    pub tied_biases: bool,
    #[config(default = "Initializer::Normal{mean:0.0,std:0.05}")]
    pub weights_init: Initializer,
    #[config(default = "Initializer::Constant{value:0.02}")]
    pub biases_init: Initializer,
}

/// A convolution optionally followed by a rectifier, with an optional skip connection.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: MaskedConv2d<B>,
    activation: Option<Relu>,
    residual: bool,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv.forward(input.clone());

        if let Some(activation) = &self.activation {
            x = activation.forward(x);
        }

        match self.residual {
            true => x + input,
            false => x,
        }
    }
}

/// PixelCNN-style network predicting a distribution over intensities for every pixel.
#[derive(Module, Debug)]
pub struct PixelCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    mode: Ignored<Mode>,
}

impl PixelCnnConfig {
    /// The layer stack described by this configuration.
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        let hidden = self.hidden_channels;
        let mut specs = Vec::with_capacity(self.num_layers + 5);

        specs.push(LayerSpec::new([7, 7], hidden, self.channels).with_rectify(false));

        for _ in 0..self.num_layers {
            specs.push(LayerSpec::new([3, 3], hidden, hidden).with_residual(self.residual));
        }

        specs.push(LayerSpec::new([3, 3], 2 * hidden, hidden));
        specs.push(LayerSpec::new([3, 3], 2 * hidden, 2 * hidden));
        specs.push(LayerSpec::new([1, 1], 4 * hidden, 2 * hidden));
        specs.push(
            LayerSpec::new([1, 1], self.mode.num_classes(), 4 * hidden).with_rectify(false),
        );

        specs
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PixelCnn<B>> {
        self.init_with_specs(self.layer_specs(), device)
    }

    /// Returns a model made of the given layers, using this configuration for
    /// everything else (mode, bias handling, initializers).
    pub fn init_with_specs<B: Backend>(
        &self,
        specs: Vec<LayerSpec>,
        device: &B::Device,
    ) -> Result<PixelCnn<B>> {
        check_specs(&specs, self.mode)?;

        let blocks = specs
            .iter()
            .map(|spec| ConvBlock {
                conv: MaskedConv2dConfig::new(spec.kernel_size, spec.channels_out, spec.channels_in)
                    .with_flip_filters(self.flip_filters)
                    .with_tied_biases(self.tied_biases)
                    .with_image_size(Some([self.image_size, self.image_size]))
                    .with_weights_init(self.weights_init.clone())
                    .with_biases_init(self.biases_init.clone())
                    .init(device),
                activation: spec.rectify.then(Relu::new),
                residual: spec.residual,
            })
            .collect();

        log::debug!(
            "Built a {} PixelCNN with {} convolutions",
            self.mode,
            specs.len()
        );

        Ok(PixelCnn {
            blocks,
            mode: Ignored(self.mode),
        })
    }
}

/// Fails fast when consecutive layers disagree on their channel count.
pub fn check_specs(specs: &[LayerSpec], mode: Mode) -> Result<()> {
    let last = specs.last().ok_or(PixelCnnError::EmptyNetwork)?;

    for (index, pair) in specs.windows(2).enumerate() {
        if pair[0].channels_out != pair[1].channels_in {
            return Err(PixelCnnError::ChannelMismatch {
                index,
                channels_out: pair[0].channels_out,
                next_channels_in: pair[1].channels_in,
            });
        }
    }

    for (index, spec) in specs.iter().enumerate() {
        if spec.residual && spec.channels_in != spec.channels_out {
            return Err(PixelCnnError::InvalidResidual {
                index,
                channels_in: spec.channels_in,
                channels_out: spec.channels_out,
            });
        }
    }

    if last.channels_out != mode.num_classes() {
        return Err(PixelCnnError::ClassCountMismatch {
            mode,
            expected: mode.num_classes(),
            actual: last.channels_out,
        });
    }

    Ok(())
}

impl<B: Backend> PixelCnn<B> {
    /// Runs the convolution stack.
    ///
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, num_classes, height, width]`
    pub fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(images, |x, block| block.forward(x))
    }

    /// Per-pixel probabilities, one row per pixel of every image, example-major.
    ///
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size * height * width, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = flatten_pixels(self.forward_features(images));

        match self.mode() {
            Mode::Multinomial => softmax(logits, 1),
            Mode::Binary => sigmoid(logits),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode.0
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }
}

/// Moves the class axis last and flattens everything else.
///
/// Row `b * height * width + y * width + x` holds the classes of pixel `(y, x)`
/// of example `b`, which is the order targets are flattened in.
pub fn flatten_pixels<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, num_classes, height, width] = features.dims();

    features
        .permute([1, 0, 2, 3])
        .reshape([num_classes, batch_size * height * width])
        .swap_dims(0, 1)
}
