use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::tensor::backend::Backend;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::Tensor;

/// Configuration to create a [masked convolution](MaskedConv2d) layer using the
/// [init function](MaskedConv2dConfig::init).
#[derive(Config, Debug)]
pub struct MaskedConv2dConfig {
    /// The size of the kernel, `[height, width]`.
    pub kernel_size: [usize; 2],
    /// The number of output channels.
    pub channels_out: usize,
    /// The number of input channels.
    pub channels_in: usize,
    /// Flip the kernel before applying it (true convolution). When disabled the
    /// kernel is applied as stored (cross-correlation).
    #[config(default = false)]
    pub flip_filters: bool,
    /// If bias should be added to the output.
    #[config(default = true)]
    pub bias: bool,
    /// One bias per output channel when `true`, one bias per output channel and
    /// spatial position otherwise.
    #[config(default = true)]
    pub tied_biases: bool,
    /// Spatial size `[height, width]` of the feature maps, required by untied biases.
    pub image_size: Option<[usize; 2]>,
    /// Initializer of the kernel.
    #[config(default = "Initializer::Normal{mean:0.0,std:0.05}")]
    pub weights_init: Initializer,
    /// Initializer of the bias.
    #[config(default = "Initializer::Constant{value:0.02}")]
    pub biases_init: Initializer,
}

/// A 2D convolution with "half" padding whose kernel flip can be disabled.
///
/// Should be created with [MaskedConv2dConfig].
#[derive(Module, Debug)]
pub struct MaskedConv2d<B: Backend> {
    /// Tensor of shape `[channels_out, channels_in, kernel_height, kernel_width]`
    pub weight: Param<Tensor<B, 4>>,
    /// Tensor of shape `[channels_out, 1, 1]` (tied) or `[channels_out, height, width]` (untied)
    pub bias: Option<Param<Tensor<B, 3>>>,
    padding: [usize; 2],
    flip_filters: bool,
}

impl MaskedConv2dConfig {
    /// Initialize a new [masked convolution](MaskedConv2d) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> MaskedConv2d<B> {
        let [kernel_height, kernel_width] = self.kernel_size;
        let shape = [
            self.channels_out,
            self.channels_in,
            kernel_height,
            kernel_width,
        ];
        let weight = self.weights_init.init(shape, device);

        let bias = self
            .bias
            .then(|| self.biases_init.init(self.bias_shape(), device));

        MaskedConv2d {
            weight,
            bias,
            padding: [kernel_height / 2, kernel_width / 2],
            flip_filters: self.flip_filters,
        }
    }

    fn bias_shape(&self) -> [usize; 3] {
        match (self.tied_biases, self.image_size) {
            (true, _) => [self.channels_out, 1, 1],
            (false, Some([height, width])) => [self.channels_out, height, width],
            (false, None) => {
                log::warn!(
                    "Untied biases requested without an image size, falling back to tied biases for a {}x{} convolution with {} filters",
                    self.kernel_size[0],
                    self.kernel_size[1],
                    self.channels_out
                );
                [self.channels_out, 1, 1]
            }
        }
    }
}

impl<B: Backend> MaskedConv2d<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels_in, height, width]`
    /// - output: `[batch_size, channels_out, height, width]` for odd kernel sizes
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = match self.flip_filters {
            true => self.weight.val().flip([2, 3]),
            false => self.weight.val(),
        };

        let output = conv2d(
            input,
            weight,
            None,
            ConvOptions::new([1, 1], self.padding, [1, 1], 1),
        );

        match &self.bias {
            Some(bias) => output + bias.val().unsqueeze::<4>(),
            None => output,
        }
    }
}
