use burn::{prelude::Backend, tensor::Device};
use mdgan_train::generator::Generator;

use crate::{EvalError, classifier::FidClassifier, stats::extend_features};

/// Inception-style score of a set of class distributions.
///
/// `probs` holds one row of `num_classes` probabilities per sample. The samples are split into
/// `splits` equal parts, each scored as exp(E_x KL(p(y|x) || p(y))). Returns the mean and
/// population standard deviation over the splits.
pub fn inception_score(
    probs: &[f32],
    num_classes: usize,
    splits: usize,
) -> Result<(f64, f64), EvalError> {
    if num_classes == 0 {
        return Err(EvalError::NoClasses);
    }
    let n = probs.len() / num_classes;
    if splits == 0 || n < splits {
        return Err(EvalError::NotEnoughSamples {
            needed: splits.max(1),
            got: n,
        });
    }

    let part_len = n / splits;
    let scores: Vec<f64> = (0..splits)
        .map(|k| {
            let part = &probs[k * part_len * num_classes..(k + 1) * part_len * num_classes];

            let mut py = vec![0.0f64; num_classes];
            for row in part.chunks_exact(num_classes) {
                for (acc, &p) in py.iter_mut().zip(row) {
                    *acc += p as f64;
                }
            }
            py.iter_mut().for_each(|p| *p /= part_len as f64);

            let mean_kl = part
                .chunks_exact(num_classes)
                .map(|row| {
                    row.iter()
                        .zip(&py)
                        .filter(|&(&p, _)| p > 0.0)
                        .map(|(&p, &q)| p as f64 * (p as f64 / q).ln())
                        .sum::<f64>()
                })
                .sum::<f64>()
                / part_len as f64;
            mean_kl.exp()
        })
        .collect();

    let mean = scores.iter().sum::<f64>() / splits as f64;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / splits as f64;
    Ok((mean, var.sqrt()))
}

/// Score `n_samples` generated images with the classifier.
///
/// Samples are drawn in full batches only, so `n_samples` is rounded down to a multiple of
/// `batch_size` and has to exceed it.
pub fn score_generator<B: Backend>(
    generator: &Generator<B>,
    classifier: &FidClassifier<B>,
    n_samples: usize,
    batch_size: usize,
    splits: usize,
    device: &Device<B>,
) -> Result<(f64, f64), EvalError> {
    if batch_size == 0 || n_samples <= batch_size {
        return Err(EvalError::NotEnoughSamples {
            needed: batch_size + 1,
            got: n_samples,
        });
    }

    let num_batches = n_samples / batch_size;
    let mut probs = Vec::with_capacity(num_batches * batch_size * 10);
    let mut num_classes = 0;
    for _ in 0..num_batches {
        let batch_probs = classifier.probabilities(generator.sample(batch_size, device));
        num_classes = batch_probs.dims()[1];
        extend_features(&mut probs, batch_probs);
    }

    log::debug!(
        "Scoring {} samples in {} splits",
        num_batches * batch_size,
        splits
    );
    inception_score(&probs, num_classes, splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classifier::FidClassifierConfig, config::ClassifierArch};
    use assert_approx_eq::assert_approx_eq;
    use burn::backend::NdArray;
    use mdgan_dataset::DatasetKind;
    use mdgan_train::generator::GeneratorConfig;

    fn one_hot_rows(n: usize, classes: usize) -> Vec<f32> {
        (0..n)
            .flat_map(|i| (0..classes).map(move |c| if c == i % classes { 1.0 } else { 0.0 }))
            .collect()
    }

    #[test]
    fn confident_and_diverse_predictions_score_num_classes() {
        let probs = one_hot_rows(20, 10);
        let (mean, std) = inception_score(&probs, 10, 2).unwrap();
        assert_approx_eq!(mean, 10.0, 1e-9);
        assert_approx_eq!(std, 0.0, 1e-9);
    }

    #[test]
    fn uniform_predictions_score_one() {
        let probs = vec![0.25f32; 8 * 4];
        let (mean, _) = inception_score(&probs, 4, 1).unwrap();
        assert_approx_eq!(mean, 1.0, 1e-9);
    }

    #[test]
    fn std_is_over_splits() {
        // First split is fully diverse (score 2), the second is collapsed (score 1).
        let probs = [1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let (mean, std) = inception_score(&probs, 2, 2).unwrap();
        assert_approx_eq!(mean, 1.5, 1e-9);
        assert_approx_eq!(std, 0.5, 1e-9);
    }

    #[test]
    fn more_splits_than_samples_is_an_error() {
        assert!(inception_score(&one_hot_rows(2, 10), 10, 3).is_err());
        assert!(inception_score(&one_hot_rows(2, 10), 10, 0).is_err());
    }

    #[test]
    fn zero_classes_is_an_error() {
        assert!(matches!(
            inception_score(&[], 0, 1),
            Err(EvalError::NoClasses)
        ));
        assert!(matches!(
            inception_score(&[0.5, 0.5], 0, 1),
            Err(EvalError::NoClasses)
        ));
    }

    #[test]
    fn generator_needs_more_samples_than_a_batch() {
        let device = Default::default();
        let generator = GeneratorConfig::new(DatasetKind::Mnist)
            .with_z_dim(8)
            .init::<NdArray>(&device);
        let classifier = FidClassifierConfig::new(DatasetKind::Mnist, ClassifierArch::Mlp)
            .init::<NdArray>(&device);

        let err = score_generator(&generator, &classifier, 8, 8, 1, &device);
        assert!(matches!(
            err,
            Err(EvalError::NotEnoughSamples { needed: 9, got: 8 })
        ));

        // 20 samples in batches of 8 only scores 16 of them.
        let (mean, std) = score_generator(&generator, &classifier, 20, 8, 2, &device).unwrap();
        assert!(mean >= 1.0 - 1e-6 && mean.is_finite());
        assert!(std >= 0.0);
    }
}
