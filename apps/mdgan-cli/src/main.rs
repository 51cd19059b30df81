#![recursion_limit = "256"]

mod ui;

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use anyhow::Context;
use burn::{
    backend::{Autodiff, Wgpu, wgpu::WgpuDevice},
    prelude::Backend,
};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use mdgan_dataset::{
    DatasetKind, LoadDatasetConfig, Split, batch_loader::BatchLoader, load_dataset,
};
use mdgan_eval::{
    classifier::{FidClassifierConfig, load_classifier, save_classifier, train_classifier},
    config::{ClassifierArch, ClassifierTrainConfig, EvalConfig},
    score_generator,
    stats::test_statistics,
};
use mdgan_process::{
    args_file::{explicit_args, load_config_from_file, merge_configs, save_config_to_file},
    checkpoint::load_generator,
    compare::{compare_generators, format_table},
    config::{CompareConfig, TrainStreamConfig},
    train_stream::train_stream_process,
};
use mdgan_train::{config::ModelConfig, gan::create_generator};
use tracing::{Instrument, trace_span};

use crate::ui::process_ui;

type GpuBackend = Wgpu;
type DiffBackend = Autodiff<Wgpu>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Multi-discriminator GAN training with hypervolume maximisation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Command {
    /// Train a generator against multiple discriminators.
    Train {
        /// Read default settings from an args file. Flags on the command line win.
        #[arg(long)]
        args_file: Option<PathBuf>,
        #[command(flatten)]
        config: TrainStreamConfig,
    },
    /// Train the classifier used for FID and inception score.
    TrainClassifier {
        #[command(flatten)]
        load_config: LoadDatasetConfig,
        #[command(flatten)]
        train_config: ClassifierTrainConfig,
        /// Classifier architecture.
        #[arg(long, value_enum, default_value = "cnn")]
        arch: ClassifierArch,
        /// Where to write the trained weights.
        #[arg(long, default_value = "./classifier.mpk")]
        output: PathBuf,
        #[arg(long, default_value = "1")]
        seed: u64,
    },
    /// Compute and cache the feature statistics of the test split.
    TestStats {
        #[command(flatten)]
        load_config: LoadDatasetConfig,
        #[command(flatten)]
        eval_config: EvalConfig,
    },
    /// Compare the FID of all saved generators in a folder.
    Compare {
        #[command(flatten)]
        load_config: LoadDatasetConfig,
        #[command(flatten)]
        model_config: ModelConfig,
        #[command(flatten)]
        eval_config: EvalConfig,
        #[command(flatten)]
        compare_config: CompareConfig,
    },
    /// Inception score of a saved generator, using the FID classifier.
    Score {
        /// Generator weights (.mpk).
        generator: PathBuf,
        #[arg(long, value_enum, default_value = "mnist")]
        dataset: DatasetKind,
        #[command(flatten)]
        model_config: ModelConfig,
        #[command(flatten)]
        eval_config: EvalConfig,
        /// Number of generated samples to score.
        #[arg(long, default_value = "10000")]
        n_samples: usize,
        /// Number of splits to average the score over.
        #[arg(long, default_value = "10")]
        splits: usize,
    },
}

fn classifier_path(eval_config: &EvalConfig) -> anyhow::Result<&PathBuf> {
    eval_config
        .fid_model_path
        .as_ref()
        .context("No classifier given. Use --fid-model-path, or train one with train-classifier")
}

async fn run(
    command: Command,
    explicit: BTreeSet<String>,
    multi: MultiProgress,
) -> anyhow::Result<()> {
    let device = WgpuDevice::default();

    match command {
        Command::Train { args_file, config } => {
            let config = match args_file {
                Some(path) => {
                    let file_config = load_config_from_file(&path)
                        .await
                        .with_context(|| format!("Failed to read args file {}", path.display()))?;
                    merge_configs(&file_config, &config, &explicit)
                        .context("Failed to merge args file with command line")?
                }
                None => config,
            };

            let dir = &config.process_config.checkpoint_path;
            tokio::fs::create_dir_all(dir).await?;
            save_config_to_file(&config, &dir.join("args.txt")).await?;

            let stream = train_stream_process::<DiffBackend>(config, device);
            process_ui(stream, multi).await?;
        }
        Command::TrainClassifier {
            load_config,
            train_config,
            arch,
            output,
            seed,
        } => {
            DiffBackend::seed(&device, seed);
            let train = load_dataset(&load_config, Split::Train)
                .instrument(trace_span!("Load train split"))
                .await?;
            let test = load_dataset(&load_config, Split::Test)
                .instrument(trace_span!("Load test split"))
                .await?;

            let mut loader = BatchLoader::new(
                Arc::new(train),
                load_config.batch_size,
                true,
                load_config.hflip(),
                seed,
            );
            let model_config = FidClassifierConfig::new(load_config.dataset, arch);
            let (model, accuracy) = train_classifier::<DiffBackend>(
                &model_config,
                &train_config,
                &mut loader,
                &test,
                &device,
            )
            .await;

            save_classifier(model, &output)?;
            log::info!(
                "Saved classifier to {} (test accuracy {:.2}%)",
                output.display(),
                accuracy * 100.0
            );
        }
        Command::TestStats {
            load_config,
            eval_config,
        } => {
            let model_config = FidClassifierConfig::new(load_config.dataset, eval_config.fid_model);
            let classifier = load_classifier::<GpuBackend>(
                &model_config,
                classifier_path(&eval_config)?,
                &device,
            )?;
            let test = load_dataset(&load_config, Split::Test).await?;

            let stats = test_statistics(
                &classifier,
                &test,
                eval_config.eval_batch_size,
                &eval_config.data_stat_path,
                &device,
            )
            .await?;
            log::info!(
                "Test statistics over {} features in {}",
                stats.dim(),
                eval_config.data_stat_path.display()
            );
        }
        Command::Compare {
            load_config,
            model_config,
            eval_config,
            compare_config,
        } => {
            let kind = load_config.dataset;
            let classifier_config = FidClassifierConfig::new(kind, eval_config.fid_model);
            let classifier = load_classifier::<GpuBackend>(
                &classifier_config,
                classifier_path(&eval_config)?,
                &device,
            )?;
            let test = load_dataset(&load_config, Split::Test).await?;
            let data_stats = test_statistics(
                &classifier,
                &test,
                eval_config.eval_batch_size,
                &eval_config.data_stat_path,
                &device,
            )
            .await?;

            let results = compare_generators(
                &compare_config,
                &model_config,
                kind,
                &classifier,
                &data_stats,
                eval_config.eval_batch_size,
                &device,
            )
            .await?;
            println!("{}", format_table(&results));
        }
        Command::Score {
            generator,
            dataset,
            model_config,
            eval_config,
            n_samples,
            splits,
        } => {
            let classifier_config = FidClassifierConfig::new(dataset, eval_config.fid_model);
            let classifier = load_classifier::<GpuBackend>(
                &classifier_config,
                classifier_path(&eval_config)?,
                &device,
            )?;
            let template = create_generator::<GpuBackend>(&model_config, dataset, &device);
            let model = load_generator(template, &generator, &device)?;

            let (mean, std) = score_generator(
                &model,
                &classifier,
                n_samples,
                eval_config.eval_batch_size,
                splits,
                &device,
            )?;
            println!("Inception score: {mean:.4} ± {std:.4}");
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .build();
    let level = logger.filter();
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger).try_init()?;
    log::set_max_level(level);

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    let explicit = matches
        .subcommand_matches("train")
        .map(explicit_args)
        .unwrap_or_default();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli.command, explicit, multi))
}
