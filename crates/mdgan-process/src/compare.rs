use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::{prelude::Backend, tensor::Device};
use clap::ValueEnum;
use mdgan_dataset::DatasetKind;
use mdgan_eval::{GaussianStats, classifier::FidClassifier, compute_fid};
use mdgan_train::{
    config::{ModelConfig, TrainMode},
    gan::create_generator,
};

use crate::{checkpoint::load_generator, config::CompareConfig};

/// FID scores of repeated evaluations of one generator.
#[derive(Clone, Debug)]
pub struct ModelFid {
    pub name: String,
    pub fids: Vec<f64>,
}

impl ModelFid {
    pub fn mean(&self) -> f64 {
        self.fids.iter().sum::<f64>() / self.fids.len().max(1) as f64
    }

    pub fn std(&self) -> f64 {
        let mean = self.mean();
        let var = self.fids.iter().map(|f| (f - mean).powi(2)).sum::<f64>()
            / self.fids.len().max(1) as f64;
        var.sqrt()
    }

    pub fn min(&self) -> f64 {
        self.fids.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Train mode encoded in a `G_<mode>_<suffix>.mpk` file name.
pub fn mode_from_file_name(name: &str) -> Option<TrainMode> {
    let rest = name.strip_prefix("G_")?.strip_suffix(".mpk")?;
    // Labels can contain underscores themselves, so prefer the longest match.
    TrainMode::value_variants()
        .iter()
        .copied()
        .filter(|m| rest.starts_with(&format!("{}_", m.label())))
        .max_by_key(|m| m.label().len())
}

/// All generator files in `dir`, in natural order.
pub async fn generator_files(dir: &Path) -> anyhow::Result<Vec<(TrainMode, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read checkpoint folder {}", dir.display()))?;

    let mut paths = vec![];
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    alphanumeric_sort::sort_path_slice(&mut paths);

    Ok(paths
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            Some((mode_from_file_name(name)?, path))
        })
        .collect())
}

/// Repeatedly evaluate every stored generator plus an untrained baseline.
pub async fn compare_generators<B: Backend>(
    config: &CompareConfig,
    model_config: &ModelConfig,
    dataset: DatasetKind,
    classifier: &FidClassifier<B>,
    data_stats: &GaussianStats,
    batch_size: usize,
    device: &Device<B>,
) -> anyhow::Result<Vec<ModelFid>> {
    let files = generator_files(&config.cp_folder).await?;
    if files.is_empty() {
        log::warn!("No G_<mode>_*.mpk generators in {}", config.cp_folder.display());
    }

    let mut generators = vec![];
    for (mode, path) in files {
        let template = create_generator(model_config, dataset, device);
        let generator = load_generator(template, &path, device)?;
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        generators.push((format!("{} ({stem})", mode.display_name()), generator));
    }
    generators.push(("Random".to_owned(), create_generator(model_config, dataset, device)));

    let mut results = vec![];
    for (name, generator) in generators {
        log::info!("Evaluating {name} {} times", config.ntests);
        let fids = (0..config.ntests)
            .map(|_| {
                compute_fid(
                    &generator,
                    classifier,
                    batch_size,
                    config.nsamples,
                    data_stats,
                    device,
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to evaluate {name}"))?;
        results.push(ModelFid { name, fids });
    }
    Ok(results)
}

/// Plain text table of the comparison results.
pub fn format_table(results: &[ModelFid]) -> String {
    let width = results.iter().map(|r| r.name.len()).max().unwrap_or(0).max(5);
    let mut out = format!(
        "{:<width$}  {:>12}  {:>12}  {:>12}\n",
        "Model", "mean FID", "std", "min"
    );
    for r in results {
        out += &format!(
            "{:<width$}  {:>12.4}  {:>12.4}  {:>12.4}\n",
            r.name,
            r.mean(),
            r.std(),
            r.min()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes_from_file_names() {
        assert_eq!(mode_from_file_name("G_hyper_best.mpk"), Some(TrainMode::Hyper));
        assert_eq!(
            mode_from_file_name("G_gman_grad_best.mpk"),
            Some(TrainMode::GmanGrad)
        );
        assert_eq!(mode_from_file_name("G_gman_12.mpk"), Some(TrainMode::Gman));
        assert_eq!(mode_from_file_name("G_loss_delta_3.mpk"), Some(TrainMode::LossDelta));
        assert_eq!(mode_from_file_name("checkpoint_5.mpk"), None);
        assert_eq!(mode_from_file_name("G_unknown_best.mpk"), None);
        assert_eq!(mode_from_file_name("G_hyper_best.json"), None);
    }

    #[test]
    fn summary_statistics() {
        let r = ModelFid {
            name: "HV".to_owned(),
            fids: vec![1.0, 2.0, 3.0],
        };
        assert_eq!(r.mean(), 2.0);
        assert_eq!(r.min(), 1.0);
        assert!((r.std() - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let table = format_table(&[r]);
        assert!(table.starts_with("Model"));
        assert!(table.lines().nth(1).unwrap().starts_with("HV"));
    }

    #[tokio::test]
    async fn lists_generators_in_natural_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["G_hyper_10.mpk", "G_hyper_9.mpk", "checkpoint_1.mpk", "G_vanilla_best.mpk"] {
            tokio::fs::write(dir.path().join(name), b"").await.unwrap();
        }
        let files = generator_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|(_, p)| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["G_hyper_9.mpk", "G_hyper_10.mpk", "G_vanilla_best.mpk"]);
    }
}
