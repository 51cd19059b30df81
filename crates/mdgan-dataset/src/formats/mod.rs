use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{Instrument, trace_span};

use crate::{DatasetKind, ImageDataset, LoadDatasetConfig, Split};

mod cifar;
mod mnist;

pub use cifar::read_cifar10;
pub use mnist::read_mnist;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error while reading {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected magic number {found:#x} in {path:?} (expected {expected:#x})")]
    BadMagic {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("File {path:?} is truncated or malformed")]
    Truncated { path: PathBuf },

    #[error("Found {images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },

    #[error("Unexpected image size {rows}x{cols}")]
    BadImageSize { rows: usize, cols: usize },

    #[error("No samples found in {path:?}")]
    Empty { path: PathBuf },
}

pub(crate) async fn read_file(path: &Path) -> Result<Vec<u8>, DatasetError> {
    tokio::fs::read(path).await.map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load one split of the configured dataset into memory.
pub async fn load_dataset(
    config: &LoadDatasetConfig,
    split: Split,
) -> Result<ImageDataset, DatasetError> {
    let dir = &config.data_path;
    log::info!("Loading {:?} split of {} from {dir:?}", split, config.dataset.name());

    let mut dataset = match config.dataset {
        DatasetKind::Mnist => {
            read_mnist(dir, split)
                .instrument(trace_span!("Read mnist"))
                .await?
        }
        DatasetKind::Cifar10 => {
            read_cifar10(dir, split)
                .instrument(trace_span!("Read cifar10"))
                .await?
        }
    };

    if dataset.is_empty() {
        return Err(DatasetError::Empty { path: dir.clone() });
    }

    if let Some(max) = config.max_samples {
        dataset.truncate(max);
    }

    log::info!("Loaded {} samples", dataset.len());
    Ok(dataset)
}
