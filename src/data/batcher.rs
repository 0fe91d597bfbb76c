use burn::{
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
    prelude::*,
};

use crate::mode::Mode;

const WIDTH: usize = 28;
const HEIGHT: usize = 28;

/// Turns MNIST items into network inputs and per-pixel targets.
///
/// The digit label of each item has no role in the model and is dropped.
#[derive(Clone, Debug, Default, new)]
pub struct PixelBatcher {
    mode: Mode,
}

#[derive(Clone, Debug)]
pub struct PixelBatch<B: Backend> {
    /// Intensities scaled to `[0, 1]`, shape `[batch_size, 1, 28, 28]`.
    pub images: Tensor<B, 4>,
    /// Class of every pixel, shape `[batch_size * 28 * 28]`, example-major then row-major.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, PixelBatch<B>> for PixelBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> PixelBatch<B> {
        let batch_size = items.len();
        let mut images = Vec::with_capacity(batch_size * WIDTH * HEIGHT);
        let mut targets = Vec::with_capacity(batch_size * WIDTH * HEIGHT);

        for item in items.iter() {
            for row in item.image.iter() {
                for &pixel in row.iter() {
                    let intensity = pixel.clamp(0.0, 255.0) as u8;
                    images.push(pixel / 255.0);
                    targets.push(self.mode.target(intensity));
                }
            }
        }

        let images = TensorData::new(images, [batch_size, 1, HEIGHT, WIDTH]);
        let targets = TensorData::new(targets, [batch_size * HEIGHT * WIDTH]);

        PixelBatch {
            images: Tensor::from_data(images.convert::<B::FloatElem>(), device),
            targets: Tensor::from_data(targets.convert::<B::IntElem>(), device),
        }
    }
}
