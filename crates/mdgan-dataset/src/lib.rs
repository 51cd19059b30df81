pub mod batch_loader;
pub mod config;
mod formats;

pub use config::LoadDatasetConfig;
pub use formats::{DatasetError, load_dataset, read_cifar10, read_mnist};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    Mnist,
    Cifar10,
}

impl DatasetKind {
    /// Image dimensions as `[channels, height, width]`.
    pub fn dims(self) -> [usize; 3] {
        match self {
            Self::Mnist => [1, 28, 28],
            Self::Cifar10 => [3, 32, 32],
        }
    }

    pub fn image_len(self) -> usize {
        self.dims().iter().product()
    }

    pub fn num_classes(self) -> usize {
        10
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::Cifar10 => "cifar10",
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Split {
    Train,
    Test,
}

/// A fully loaded image classification dataset.
///
/// Images are stored flat in NCHW order and normalised to [-1, 1].
#[derive(Clone, Debug)]
pub struct ImageDataset {
    pub kind: DatasetKind,
    pub split: Split,
    images: Vec<f32>,
    labels: Vec<u8>,
}

impl ImageDataset {
    pub fn new(
        kind: DatasetKind,
        split: Split,
        images: Vec<f32>,
        labels: Vec<u8>,
    ) -> Result<Self, DatasetError> {
        if images.len() != labels.len() * kind.image_len() {
            return Err(DatasetError::CountMismatch {
                images: images.len() / kind.image_len(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            kind,
            split,
            images,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image(&self, index: usize) -> &[f32] {
        let len = self.kind.image_len();
        &self.images[index * len..(index + 1) * len]
    }

    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }

    /// Keep only the first `max` samples.
    pub fn truncate(&mut self, max: usize) {
        if max < self.len() {
            self.labels.truncate(max);
            self.images.truncate(max * self.kind.image_len());
        }
    }
}

/// Map raw 8-bit pixels to [-1, 1].
pub(crate) fn normalize_pixel(p: u8) -> f32 {
    p as f32 / 255.0 * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_rejects_mismatched_labels() {
        let images = vec![0.0; DatasetKind::Mnist.image_len() * 2];
        let err = ImageDataset::new(DatasetKind::Mnist, Split::Train, images, vec![1, 2, 3]);
        assert!(matches!(
            err,
            Err(DatasetError::CountMismatch {
                images: 2,
                labels: 3
            })
        ));
    }

    #[test]
    fn truncate_keeps_prefix() {
        let len = DatasetKind::Mnist.image_len();
        let images: Vec<f32> = (0..3).flat_map(|i| vec![i as f32; len]).collect();
        let mut data =
            ImageDataset::new(DatasetKind::Mnist, Split::Test, images, vec![7, 8, 9]).unwrap();
        data.truncate(2);
        assert_eq!(data.len(), 2);
        assert_eq!(data.label(1), 8);
        assert!(data.image(1).iter().all(|&p| p == 1.0));
    }

    #[test]
    fn pixels_span_unit_range() {
        assert_eq!(normalize_pixel(0), -1.0);
        assert_eq!(normalize_pixel(255), 1.0);
    }
}
