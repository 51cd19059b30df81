use burn::{prelude::Backend, tensor::Device};
use mdgan_train::generator::Generator;
use nalgebra::{DMatrix, SymmetricEigen};
use tracing::trace_span;

use crate::{
    EvalError,
    classifier::FidClassifier,
    stats::{GaussianStats, extend_features},
};

fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Square root of a symmetric positive semi-definite matrix.
fn sqrt_psd(m: &DMatrix<f64>) -> DMatrix<f64> {
    let eig = SymmetricEigen::new(symmetrize(m));
    let roots = eig.eigenvalues.map(|v| v.max(0.0).sqrt());
    &eig.eigenvectors * DMatrix::from_diagonal(&roots) * eig.eigenvectors.transpose()
}

/// Fréchet distance between two Gaussians.
///
/// `|m_a - m_b|^2 + tr(C_a) + tr(C_b) - 2 tr((C_a C_b)^1/2)`, where the last trace is taken
/// over the eigenvalues of `C_a^1/2 C_b C_a^1/2`, which is symmetric and shares them.
pub fn frechet_distance(a: &GaussianStats, b: &GaussianStats) -> Result<f64, EvalError> {
    if a.dim() != b.dim() {
        return Err(EvalError::DimMismatch(a.dim(), b.dim()));
    }
    a.validate()?;
    b.validate()?;

    let diff = a.mean_vector() - b.mean_vector();
    let c_a = a.cov_matrix();
    let c_b = b.cov_matrix();

    let sqrt_a = sqrt_psd(&c_a);
    let inner = symmetrize(&(&sqrt_a * &c_b * &sqrt_a));
    let trace_sqrt: f64 = SymmetricEigen::new(inner)
        .eigenvalues
        .iter()
        .map(|v| v.max(0.0).sqrt())
        .sum();

    let fid = diff.norm_squared() + c_a.trace() + c_b.trace() - 2.0 * trace_sqrt;
    // Only rounding can push this below zero.
    Ok(fid.max(0.0))
}

/// Feature statistics of `n_samples` fresh generator samples.
pub fn generated_statistics<B: Backend>(
    generator: &Generator<B>,
    classifier: &FidClassifier<B>,
    batch_size: usize,
    n_samples: usize,
    device: &Device<B>,
) -> Result<GaussianStats, EvalError> {
    let batch_size = batch_size.max(1);
    let mut features = Vec::new();
    let mut dim = 0;
    let mut remaining = n_samples;

    while remaining > 0 {
        let n = remaining.min(batch_size);
        let logits = classifier.forward(generator.sample(n, device));
        dim = logits.dims()[1];
        extend_features(&mut features, logits);
        remaining -= n;
    }

    GaussianStats::from_features(&features, dim)
}

/// FID of a generator against precomputed data statistics.
pub fn compute_fid<B: Backend>(
    generator: &Generator<B>,
    classifier: &FidClassifier<B>,
    batch_size: usize,
    n_samples: usize,
    data_stats: &GaussianStats,
    device: &Device<B>,
) -> Result<f64, EvalError> {
    let _span = trace_span!("Compute FID").entered();
    let generated = generated_statistics(generator, classifier, batch_size, n_samples, device)?;
    frechet_distance(&generated, data_stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classifier::FidClassifierConfig, config::ClassifierArch};
    use assert_approx_eq::assert_approx_eq;
    use burn::backend::NdArray;
    use mdgan_dataset::DatasetKind;
    use mdgan_train::generator::GeneratorConfig;

    fn stats(mean: Vec<f64>, cov: Vec<Vec<f64>>) -> GaussianStats {
        GaussianStats { mean, cov }
    }

    #[test]
    fn identical_distributions_have_zero_distance() {
        let a = stats(vec![1.0, -2.0], vec![vec![2.0, 0.5], vec![0.5, 1.0]]);
        assert_approx_eq!(frechet_distance(&a, &a).unwrap(), 0.0, 1e-9);
    }

    #[test]
    fn mean_shift_adds_squared_distance() {
        let cov = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let a = stats(vec![0.0, 0.0], cov.clone());
        let b = stats(vec![3.0, 4.0], cov);
        assert_approx_eq!(frechet_distance(&a, &b).unwrap(), 25.0, 1e-9);
    }

    #[test]
    fn covariance_term_matches_closed_form() {
        // diag(1, 4) vs diag(4, 1): 5 + 5 - 2 * (2 + 2) = 2.
        let a = stats(vec![0.0, 0.0], vec![vec![1.0, 0.0], vec![0.0, 4.0]]);
        let b = stats(vec![0.0, 0.0], vec![vec![4.0, 0.0], vec![0.0, 1.0]]);
        assert_approx_eq!(frechet_distance(&a, &b).unwrap(), 2.0, 1e-9);
        assert_approx_eq!(
            frechet_distance(&a, &b).unwrap(),
            frechet_distance(&b, &a).unwrap(),
            1e-9
        );
    }

    #[test]
    fn singular_covariances_stay_non_negative() {
        let a = stats(vec![0.0, 0.0], vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        let b = stats(vec![0.0, 0.0], vec![vec![0.0, 0.0], vec![0.0, 0.0]]);
        let fid = frechet_distance(&a, &b).unwrap();
        assert!(fid >= 0.0);
        assert_approx_eq!(fid, 2.0, 1e-9);
    }

    #[test]
    fn mismatched_dims_error() {
        let a = stats(vec![0.0], vec![vec![1.0]]);
        let b = stats(vec![0.0, 0.0], vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(matches!(
            frechet_distance(&a, &b),
            Err(EvalError::DimMismatch(1, 2))
        ));
    }

    #[test]
    fn covariance_of_wrong_shape_errors() {
        let good = stats(vec![0.0, 0.0], vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let bad = stats(vec![0.0, 0.0], vec![vec![1.0]]);
        assert!(matches!(
            frechet_distance(&bad, &good),
            Err(EvalError::BadCovariance { dim: 2 })
        ));
        assert!(matches!(
            frechet_distance(&good, &bad),
            Err(EvalError::BadCovariance { dim: 2 })
        ));
    }

    #[test]
    fn generator_fid_is_finite() {
        let device = Default::default();
        let generator = GeneratorConfig::new(DatasetKind::Mnist)
            .with_z_dim(8)
            .init::<NdArray>(&device);
        let classifier = FidClassifierConfig::new(DatasetKind::Mnist, ClassifierArch::Mlp)
            .init::<NdArray>(&device);

        let data = generated_statistics(&generator, &classifier, 8, 20, &device).unwrap();
        assert_eq!(data.dim(), 10);

        let fid = compute_fid(&generator, &classifier, 8, 20, &data, &device).unwrap();
        assert!(fid.is_finite() && fid >= 0.0);
    }
}
