use std::path::Path;

use burn::{
    prelude::Backend,
    tensor::{Device, Tensor},
};
use mdgan_dataset::ImageDataset;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::{EvalError, classifier::FidClassifier};

/// Mean and covariance of a set of feature vectors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianStats {
    pub mean: Vec<f64>,
    pub cov: Vec<Vec<f64>>,
}

impl GaussianStats {
    /// Statistics of `features`, a row-major `[n, dim]` matrix.
    ///
    /// The covariance is the unbiased estimate, so at least two samples are needed.
    pub fn from_features(features: &[f32], dim: usize) -> Result<Self, EvalError> {
        let n = if dim == 0 { 0 } else { features.len() / dim };
        if n < 2 {
            return Err(EvalError::NotEnoughSamples { needed: 2, got: n });
        }

        let x = DMatrix::from_row_iterator(n, dim, features[..n * dim].iter().map(|&f| f as f64));
        let mean: DVector<f64> = x.row_mean().transpose();

        let centered = DMatrix::from_fn(n, dim, |i, j| x[(i, j)] - mean[j]);
        let cov = centered.transpose() * &centered / (n - 1) as f64;

        Ok(Self {
            mean: mean.iter().copied().collect(),
            cov: cov.row_iter().map(|r| r.iter().copied().collect()).collect(),
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Check that the covariance is a `dim x dim` matrix.
    pub fn validate(&self) -> Result<(), EvalError> {
        let dim = self.dim();
        if self.cov.len() != dim || self.cov.iter().any(|row| row.len() != dim) {
            return Err(EvalError::BadCovariance { dim });
        }
        Ok(())
    }

    pub(crate) fn mean_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.mean)
    }

    pub(crate) fn cov_matrix(&self) -> DMatrix<f64> {
        let d = self.dim();
        DMatrix::from_row_iterator(d, d, self.cov.iter().flatten().copied())
    }

    pub async fn save(&self, path: &Path) -> Result<(), EvalError> {
        let json = serde_json::to_vec(self).map_err(|source| EvalError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| EvalError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|source| EvalError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn load(path: &Path) -> Result<Self, EvalError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| EvalError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let stats: Self = serde_json::from_slice(&bytes).map_err(|source| EvalError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        stats.validate()?;
        Ok(stats)
    }
}

/// Append the rows of a `[n, dim]` feature tensor to `out`.
pub(crate) fn extend_features<B: Backend>(out: &mut Vec<f32>, features: Tensor<B, 2>) {
    let data = features.into_data().convert::<f32>();
    out.extend(data.iter::<f32>());
}

/// Feature statistics of every image in `dataset`.
pub fn dataset_statistics<B: Backend>(
    classifier: &FidClassifier<B>,
    dataset: &ImageDataset,
    batch_size: usize,
    device: &Device<B>,
) -> Result<GaussianStats, EvalError> {
    let _span = tracing::trace_span!("Dataset statistics").entered();

    let mut features = Vec::new();
    for start in (0..dataset.len()).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(dataset.len());
        let batch = dataset.batch::<B>(start..end, device);
        extend_features(&mut features, classifier.forward(batch.images));
    }
    GaussianStats::from_features(&features, dataset.kind.num_classes())
}

/// Test set statistics, read from `cache_path` if present and computed and stored otherwise.
pub async fn test_statistics<B: Backend>(
    classifier: &FidClassifier<B>,
    dataset: &ImageDataset,
    batch_size: usize,
    cache_path: &Path,
    device: &Device<B>,
) -> Result<GaussianStats, EvalError> {
    if tokio::fs::try_exists(cache_path).await.unwrap_or(false) {
        log::info!("Loading test statistics from {}", cache_path.display());
        return GaussianStats::load(cache_path).await;
    }

    log::info!(
        "Computing test statistics over {} samples",
        dataset.len()
    );
    let stats = dataset_statistics(classifier, dataset, batch_size, device)?;
    stats
        .save(cache_path)
        .instrument(tracing::trace_span!("Save statistics"))
        .await?;
    Ok(stats)
}
