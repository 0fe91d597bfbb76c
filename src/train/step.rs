use burn::{
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{Adaptor, ItemLazy, LossInput},
        TrainOutput, TrainStep, ValidStep,
    },
};

use crate::{
    data::PixelBatch,
    model::PixelCnn,
    nn::PixelCrossEntropyConfig,
};

/// Losses of one batch, adapted for the loss metric.
#[derive(new)]
pub struct PixelOutput<B: Backend> {
    /// Mean cross-entropy over the pixels of each example.
    ///
    /// Shape `[batch_size]`, so the metric weights every batch by its size.
    pub losses: Tensor<B, 1>,
}

impl<B: Backend> Adaptor<LossInput<B>> for PixelOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.losses.clone())
    }
}

impl<B: Backend> ItemLazy for PixelOutput<B> {
    type ItemSync = PixelOutput<B>;

    fn sync(self) -> Self::ItemSync {
        self
    }
}

impl<B: Backend> PixelCnn<B> {
    /// Cross-entropy of every example of the batch, averaged over its pixels.
    ///
    /// # Shapes
    ///
    /// - output: `[batch_size]`
    pub fn forward_loss(&self, batch: PixelBatch<B>) -> Tensor<B, 1> {
        let [batch_size, _, height, width] = batch.images.dims();
        let loss = PixelCrossEntropyConfig::new().with_mode(self.mode()).init();

        let probabilities = self.forward(batch.images);

        loss.forward_no_reduction(probabilities, batch.targets)
            .reshape([batch_size, height * width])
            .mean_dim(1)
            .reshape([batch_size])
    }
}

impl<B: AutodiffBackend> TrainStep<PixelBatch<B>, PixelOutput<B>> for PixelCnn<B> {
    fn step(&self, batch: PixelBatch<B>) -> TrainOutput<PixelOutput<B>> {
        let losses = self.forward_loss(batch);
        let grads = losses.clone().mean().backward();

        TrainOutput::new(self, grads, PixelOutput::new(losses.detach()))
    }
}

impl<B: Backend> ValidStep<PixelBatch<B>, PixelOutput<B>> for PixelCnn<B> {
    fn step(&self, batch: PixelBatch<B>) -> PixelOutput<B> {
        PixelOutput::new(self.forward_loss(batch))
    }
}
