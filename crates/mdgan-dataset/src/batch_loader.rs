use std::{ops::Range, sync::Arc};

use burn::prelude::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::sync::mpsc::{self, Receiver};

use crate::ImageDataset;

// Number of batches to prefetch.
const PREFETCH: usize = 4;

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images in NCHW order, normalised to [-1, 1].
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

struct BatchData {
    images: TensorData,
    labels: TensorData,
}

/// Splits a dataset into batches, one epoch at a time.
pub struct BatchLoader {
    dataset: Arc<ImageDataset>,
    batch_size: usize,
    shuffle: bool,
    hflip: bool,
    seed: u64,
    epoch: u64,
}

fn flip_horizontal(image: &mut [f32], width: usize) {
    for row in image.chunks_exact_mut(width) {
        row.reverse();
    }
}

fn assemble_batch(
    dataset: &ImageDataset,
    indices: &[usize],
    mut flip_rng: Option<&mut StdRng>,
) -> BatchData {
    let [c, h, w] = dataset.kind.dims();
    let mut pixels = Vec::with_capacity(indices.len() * c * h * w);
    let mut labels = Vec::with_capacity(indices.len());

    for &index in indices {
        let start = pixels.len();
        pixels.extend_from_slice(dataset.image(index));
        if let Some(rng) = flip_rng.as_deref_mut()
            && rng.random_bool(0.5)
        {
            flip_horizontal(&mut pixels[start..], w);
        }
        labels.push(dataset.label(index) as i64);
    }

    BatchData {
        images: TensorData::new(pixels, [indices.len(), c, h, w]),
        labels: TensorData::new(labels, [indices.len()]),
    }
}

impl ImageDataset {
    /// The samples in `range` as one batch, in order and without augmentation.
    pub fn batch<B: Backend>(&self, range: Range<usize>, device: &B::Device) -> ImageBatch<B> {
        let indices: Vec<usize> = range.collect();
        let data = assemble_batch(self, &indices, None);
        ImageBatch {
            images: Tensor::from_data(data.images, device),
            labels: Tensor::from_data(data.labels, device),
        }
    }
}

impl BatchLoader {
    pub fn new(
        dataset: Arc<ImageDataset>,
        batch_size: usize,
        shuffle: bool,
        hflip: bool,
        seed: u64,
    ) -> Self {
        assert!(batch_size > 0, "Batch size must be at least 1");
        Self {
            dataset,
            batch_size,
            shuffle,
            hflip,
            seed,
            epoch: 0,
        }
    }

    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per epoch, including a trailing partial batch.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Skip ahead, eg. when resuming from a checkpoint.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Start streaming the next epoch. Batches are assembled on a background task.
    pub fn epoch<B: Backend>(&mut self, device: &B::Device) -> EpochLoader<B> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
        self.epoch += 1;

        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut rng);
        }

        let (send_data, mut rec_data) = mpsc::channel::<BatchData>(PREFETCH);
        let dataset = self.dataset.clone();
        let batch_size = self.batch_size;
        let hflip = self.hflip;

        tokio::spawn(async move {
            for indices in order.chunks(batch_size) {
                let data = assemble_batch(&dataset, indices, hflip.then_some(&mut rng));
                if send_data.send(data).await.is_err() {
                    break;
                }
            }
            log::debug!("Finished assembling epoch batches");
        });

        let (send_batch, rec_batch) = mpsc::channel(2);
        let device = device.clone();
        tokio::spawn(async move {
            while let Some(data) = rec_data.recv().await {
                let batch = ImageBatch {
                    images: Tensor::from_data(data.images, &device),
                    labels: Tensor::from_data(data.labels, &device),
                };
                if send_batch.send(batch).await.is_err() {
                    break;
                }
            }
        });

        EpochLoader {
            receiver: rec_batch,
        }
    }
}

pub struct EpochLoader<B: Backend> {
    receiver: Receiver<ImageBatch<B>>,
}

impl<B: Backend> EpochLoader<B> {
    /// The next batch of this epoch, or `None` once the epoch is exhausted.
    pub async fn next_batch(&mut self) -> Option<ImageBatch<B>> {
        self.receiver.recv().await
    }
}
