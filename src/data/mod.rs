mod batcher;

pub use batcher::*;

use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::{
            transform::PartialDataset,
            vision::{MnistDataset, MnistItem},
            Dataset,
        },
    },
    prelude::*,
};

use crate::{mode::Mode, train::Split};

/// A lazily batched stream of pixel batches, restartable with `iter()`.
pub type PixelLoader<B> = Arc<dyn DataLoader<B, PixelBatch<B>>>;

/// Builds a dataloader over `dataset`.
///
/// With a seed, every call to `iter()` visits the items in a new random order.
/// Items are batched on the calling thread and the last batch may be partial.
pub fn pixel_loader<B, D>(mode: Mode, dataset: D, batch_size: usize, seed: Option<u64>) -> PixelLoader<B>
where
    B: Backend,
    D: Dataset<MnistItem> + 'static,
{
    let mut builder = DataLoaderBuilder::new(PixelBatcher::new(mode)).batch_size(batch_size);

    if let Some(seed) = seed {
        builder = builder.shuffle(seed);
    }

    builder.build(dataset)
}

/// The MNIST split backing `split`, optionally truncated to its first `max_items` items.
///
/// The held-out split is the MNIST test set.
pub fn mnist(split: Split, max_items: Option<usize>) -> PartialDataset<MnistDataset, MnistItem> {
    let dataset = match split {
        Split::Train => MnistDataset::train(),
        Split::Valid => MnistDataset::test(),
    };
    let end = max_items.map_or(dataset.len(), |max| max.min(dataset.len()));

    log::info!("Using {end} of {} MNIST {split} items", dataset.len());

    PartialDataset::new(dataset, 0, end)
}
