use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::{DatasetError, read_file};
use crate::{DatasetKind, ImageDataset, Split, normalize_pixel};

// One label byte followed by a 3x32x32 image in CHW order.
const RECORD_LEN: usize = 1 + 3 * 32 * 32;

fn batch_files(dir: &Path, split: Split) -> Vec<PathBuf> {
    match split {
        Split::Train => (1..=5)
            .map(|i| dir.join(format!("data_batch_{i}.bin")))
            .collect(),
        Split::Test => vec![dir.join("test_batch.bin")],
    }
}

pub(crate) fn parse_records(
    bytes: &[u8],
    path: &Path,
    pixels: &mut Vec<f32>,
    labels: &mut Vec<u8>,
) -> Result<(), DatasetError> {
    if !bytes.len().is_multiple_of(RECORD_LEN) {
        return Err(DatasetError::Truncated {
            path: path.to_path_buf(),
        });
    }

    for record in bytes.chunks_exact(RECORD_LEN) {
        labels.push(record[0]);
    }
    let decoded: Vec<f32> = bytes
        .par_chunks_exact(RECORD_LEN)
        .flat_map_iter(|record| record[1..].iter().map(|&p| normalize_pixel(p)))
        .collect();
    pixels.extend(decoded);
    Ok(())
}

/// Read the CIFAR-10 binary batches from `dir`.
pub async fn read_cifar10(dir: &Path, split: Split) -> Result<ImageDataset, DatasetError> {
    let mut pixels = vec![];
    let mut labels = vec![];

    for path in batch_files(dir, split) {
        let bytes = read_file(&path).await?;
        parse_records(&bytes, &path, &mut pixels, &mut labels)?;
        log::debug!("Read {} records from {path:?}", bytes.len() / RECORD_LEN);
    }

    ImageDataset::new(DatasetKind::Cifar10, split, pixels, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut rec = vec![label];
        rec.extend(std::iter::repeat_n(fill, RECORD_LEN - 1));
        rec
    }

    #[test]
    fn parses_records_in_order() {
        let bytes: Vec<u8> = [record(3, 0), record(7, 255)].concat();
        let mut pixels = vec![];
        let mut labels = vec![];
        parse_records(&bytes, Path::new("mem"), &mut pixels, &mut labels).unwrap();

        assert_eq!(labels, vec![3, 7]);
        assert_eq!(pixels.len(), 2 * 3072);
        assert_eq!(pixels[0], -1.0);
        assert_eq!(pixels[3072], 1.0);
    }

    #[test]
    fn rejects_partial_records() {
        let mut bytes = record(1, 0);
        bytes.pop();
        let err = parse_records(&bytes, Path::new("mem"), &mut vec![], &mut vec![]);
        assert!(matches!(err, Err(DatasetError::Truncated { .. })));
    }

    #[tokio::test]
    async fn reads_test_batch() {
        let dir = tempfile::tempdir().unwrap();
        let bytes: Vec<u8> = [record(0, 10), record(9, 20), record(4, 30)].concat();
        tokio::fs::write(dir.path().join("test_batch.bin"), bytes)
            .await
            .unwrap();

        let data = read_cifar10(dir.path(), Split::Test).await.unwrap();
        assert_eq!(data.kind, DatasetKind::Cifar10);
        assert_eq!(data.len(), 3);
        assert_eq!(data.label(1), 9);
    }
}
