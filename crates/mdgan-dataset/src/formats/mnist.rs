use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::{DatasetError, read_file};
use crate::{DatasetKind, ImageDataset, Split, normalize_pixel};

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

fn read_u32(bytes: &[u8], offset: usize, path: &Path) -> Result<u32, DatasetError> {
    let word = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| DatasetError::Truncated {
            path: path.to_path_buf(),
        })?;
    Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

/// Parse an idx header, returns the dimensions and the payload following the header.
fn parse_idx<'a>(
    bytes: &'a [u8],
    magic: u32,
    path: &Path,
) -> Result<(Vec<usize>, &'a [u8]), DatasetError> {
    let found = read_u32(bytes, 0, path)?;
    if found != magic {
        return Err(DatasetError::BadMagic {
            path: path.to_path_buf(),
            expected: magic,
            found,
        });
    }

    // The low byte of the magic number is the number of dimensions.
    let ndims = (magic & 0xff) as usize;
    let dims = (0..ndims)
        .map(|i| read_u32(bytes, 4 + 4 * i, path).map(|d| d as usize))
        .collect::<Result<Vec<_>, _>>()?;

    let header = 4 + 4 * ndims;
    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| DatasetError::Truncated {
            path: path.to_path_buf(),
        })?;
    let payload = &bytes[header..];
    if payload.len() != expected {
        return Err(DatasetError::Truncated {
            path: path.to_path_buf(),
        });
    }
    Ok((dims, payload))
}

fn split_prefix(split: Split) -> &'static str {
    match split {
        Split::Train => "train",
        Split::Test => "t10k",
    }
}

pub(crate) fn parse_mnist(
    images: &[u8],
    images_path: &Path,
    labels: &[u8],
    labels_path: &Path,
    split: Split,
) -> Result<ImageDataset, DatasetError> {
    let (img_dims, pixels) = parse_idx(images, IMAGES_MAGIC, images_path)?;
    let (_, label_bytes) = parse_idx(labels, LABELS_MAGIC, labels_path)?;

    let (rows, cols) = (img_dims[1], img_dims[2]);
    if rows != 28 || cols != 28 {
        return Err(DatasetError::BadImageSize { rows, cols });
    }
    if img_dims[0] != label_bytes.len() {
        return Err(DatasetError::CountMismatch {
            images: img_dims[0],
            labels: label_bytes.len(),
        });
    }

    let pixels: Vec<f32> = pixels.par_iter().map(|&p| normalize_pixel(p)).collect();
    ImageDataset::new(DatasetKind::Mnist, split, pixels, label_bytes.to_vec())
}

/// Read the raw MNIST idx files from `dir`.
pub async fn read_mnist(dir: &Path, split: Split) -> Result<ImageDataset, DatasetError> {
    let prefix = split_prefix(split);
    let images_path: PathBuf = dir.join(format!("{prefix}-images-idx3-ubyte"));
    let labels_path: PathBuf = dir.join(format!("{prefix}-labels-idx1-ubyte"));

    let images = read_file(&images_path).await?;
    let labels = read_file(&labels_path).await?;
    parse_mnist(&images, &images_path, &labels, &labels_path, split)
}
