use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::transform::PartialDataset;
use burn::data::dataset::vision::{MnistDataset, MnistItem};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use std::sync::Arc;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

/// Number of training samples carved out of the 60k MNIST train corpus;
/// the remaining [`NUM_VALID`] samples are held back for validation.
pub const NUM_TRAIN: usize = 48_000;
pub const NUM_VALID: usize = 12_000;

pub type Dataloader<B> = Arc<dyn DataLoader<B, DigitBatch<B>> + 'static>;

pub type CorpusSplit = PartialDataset<Arc<MnistDataset>, MnistItem>;

/// Splits the 60k MNIST train corpus into train and validation partitions.
///
/// The split is positional, so the validation partition is stable across
/// runs; only the batch order of the training partition is shuffled.
pub fn train_valid_split() -> (CorpusSplit, CorpusSplit) {
    let corpus = Arc::new(MnistDataset::train());
    debug_assert_eq!(NUM_TRAIN + NUM_VALID, corpus.len());
    let train = PartialDataset::new(corpus.clone(), 0, NUM_TRAIN);
    let valid = PartialDataset::new(corpus, NUM_TRAIN, NUM_TRAIN + NUM_VALID);
    (train, valid)
}

/// Batches the held-out 10k MNIST test set, in fixed order.
pub fn test_dataloader<B: Backend>(batch_size: usize, num_workers: usize) -> Dataloader<B> {
    DataLoaderBuilder::new(DigitBatcher::default())
        .batch_size(batch_size)
        .num_workers(num_workers)
        .build(MnistDataset::test())
}

#[derive(Clone, Default)]
pub struct DigitBatcher {}

#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    /// The input feature is the brightness, z-score normalized (mean=0.0, stddev=1.0).
    /// The original dataset had mean=0.1307, stddev=0.3081.
    ///
    /// # Shape
    /// [batch_size, 1, HEIGHT, WIDTH]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, DigitBatch<B>> for DigitBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> DigitBatch<B> {
        let (items_image, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label))
            .unzip();
        let images = items_image
            .into_iter()
            .map(|image| TensorData::from(image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, device))
            .map(|tensor| tensor.reshape([1, 1, HEIGHT, WIDTH]))
            // Normalize: scale between [0,1] and make the mean=0 and std=1
            // values mean=0.1307,std=0.3081 are from the PyTorch MNIST example
            // https://github.com/pytorch/examples/blob/54f4572509891883a947411fd7239237dd2a39c3/mnist/main.py#L122
            .map(|tensor| ((tensor / 255) - 0.1307) / 0.3081)
            .collect();

        let targets = items_label
            .into_iter()
            .map(|label: u8| {
                Tensor::<B, 1, Int>::from_data([(label as i64).elem::<B::IntElem>()], device)
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        DigitBatch { images, targets }
    }
}
