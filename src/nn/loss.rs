use burn::config::Config;
use burn::nn::loss::Reduction;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::mode::Mode;

const EPSILON: f64 = 1e-7;

/// Configuration to create a [per-pixel cross-entropy](PixelCrossEntropy) loss.
#[derive(Config, Debug)]
pub struct PixelCrossEntropyConfig {
    /// Must match the mode of the network producing the predictions.
    #[config(default = "Mode::Multinomial")]
    pub mode: Mode,
}

impl PixelCrossEntropyConfig {
    /// Initialize a new [per-pixel cross-entropy](PixelCrossEntropy) loss.
    pub fn init(&self) -> PixelCrossEntropy {
        PixelCrossEntropy { mode: self.mode }
    }
}

/// Cross-entropy between per-pixel predicted distributions and the observed intensities.
///
/// Predictions are probabilities (the output of
/// [PixelCnn::forward](crate::model::PixelCnn::forward)), not logits.
#[derive(Clone, Debug)]
pub struct PixelCrossEntropy {
    mode: Mode,
}

impl PixelCrossEntropy {
    /// Compute the criterion on the input tensors.
    ///
    /// # Shapes
    ///
    /// - probabilities: `[num_pixels, num_classes]`
    /// - targets: `[num_pixels]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        probabilities: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let losses = self.forward_no_reduction(probabilities, targets);

        match reduction {
            Reduction::Mean | Reduction::Auto => losses.mean(),
            Reduction::Sum => losses.sum(),
        }
    }

    /// Compute the criterion for every pixel.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        probabilities: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let [num_pixels, num_classes] = probabilities.dims();
        let [num_targets] = targets.dims();
        assert_eq!(
            num_pixels, num_targets,
            "Every predicted pixel needs a target: {num_pixels} predictions, {num_targets} targets",
        );

        // Clamping maps NaN to a bound, which would hide a diverged network.
        let diverged = probabilities.is_nan();
        let probabilities = probabilities
            .clone()
            .clamp(EPSILON, 1.0 - EPSILON)
            .mask_where(diverged, probabilities);

        match self.mode {
            Mode::Multinomial => {
                assert_eq!(num_classes, Mode::Multinomial.num_classes());
                let indices = targets.reshape([num_pixels, 1]);
                probabilities
                    .log()
                    .gather(1, indices)
                    .reshape([num_pixels])
                    .neg()
            }
            Mode::Binary => {
                assert_eq!(num_classes, Mode::Binary.num_classes());
                let probabilities = probabilities.reshape([num_pixels]);
                let targets = targets.float();
                let positive = targets.clone() * probabilities.clone().log();
                let negative = (targets.neg() + 1.0) * (probabilities.neg() + 1.0).log();

                (positive + negative).neg()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::tensor::TensorData;

    #[test]
    fn multinomial_loss_reads_the_target_probability() {
        let device = Default::default();
        let mut rows = vec![0.0f32; 2 * 256];
        // Pixel 0: all mass on intensity 3.
        rows[3] = 1.0;
        // Pixel 1: half on intensity 0, half on 255.
        rows[256] = 0.5;
        rows[256 + 255] = 0.5;
        let probabilities =
            Tensor::<TestBackend, 2>::from_data(TensorData::new(rows, [2, 256]), &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([3, 255], &device);

        let loss = PixelCrossEntropyConfig::new().init();
        let per_pixel = loss
            .forward_no_reduction(probabilities.clone(), targets.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(per_pixel[0].abs() < 1e-5);
        assert!((per_pixel[1] - std::f32::consts::LN_2).abs() < 1e-5);

        let mean = loss
            .forward(probabilities.clone(), targets.clone(), Reduction::Mean)
            .into_scalar();
        let sum = loss
            .forward(probabilities, targets, Reduction::Sum)
            .into_scalar();
        assert!((mean - std::f32::consts::LN_2 / 2.0).abs() < 1e-5);
        assert!((sum - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn binary_loss_matches_the_bernoulli_log_likelihood() {
        let device = Default::default();
        let probabilities = Tensor::<TestBackend, 2>::from_floats([[0.8], [0.8]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 0], &device);

        let loss = PixelCrossEntropyConfig::new()
            .with_mode(Mode::Binary)
            .init()
            .forward_no_reduction(probabilities, targets)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert!((loss[0] - -(0.8f32.ln())).abs() < 1e-5);
        assert!((loss[1] - -(0.2f32.ln())).abs() < 1e-5);
    }

    #[test]
    fn zero_probability_stays_finite() {
        let device = Default::default();
        let probabilities = Tensor::<TestBackend, 2>::zeros([4, 256], &device);
        let targets = Tensor::<TestBackend, 1, Int>::zeros([4], &device);

        let loss: f32 = PixelCrossEntropyConfig::new()
            .init()
            .forward(probabilities, targets, Reduction::Mean)
            .into_scalar();

        assert!(loss.is_finite());
    }

    #[test]
    fn nan_probabilities_are_not_clamped_away() {
        let device = Default::default();
        let probabilities =
            Tensor::<TestBackend, 2>::from_floats([[0.8], [f32::NAN]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 1], &device);

        let loss = PixelCrossEntropyConfig::new()
            .with_mode(Mode::Binary)
            .init()
            .forward_no_reduction(probabilities, targets)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert!(loss[0].is_finite());
        assert!(loss[1].is_nan());
    }
}
