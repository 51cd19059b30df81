use std::{path::Path, sync::Arc};

use anyhow::Context;
use async_fn_stream::{TryStreamEmitter, try_fn_stream};
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use mdgan_dataset::{Split, batch_loader::BatchLoader, load_dataset};
use mdgan_eval::{
    GaussianStats,
    classifier::{FidClassifier, FidClassifierConfig, load_classifier},
    compute_fid,
    samples::save_sample_grid,
    stats::test_statistics,
};
use mdgan_train::{
    gan::{Gan, create_gan},
    generator::Generator,
    msg::TrainStepStats,
    train::GanTrainer,
};
use tokio_stream::Stream;
use tracing::{Instrument, trace_span};
use web_time::{Duration, Instant};

use crate::{
    checkpoint::{
        TrainerState, best_generator_path, load_checkpoint, save_checkpoint, save_generator,
    },
    config::TrainStreamConfig,
    message::{ProcessMessage, TrainMessage},
};

// How often to report progress within an epoch.
const UPDATE_EVERY: usize = 10;

/// Running means of the step statistics over an epoch.
#[derive(Default)]
struct EpochStats {
    steps: usize,
    gen_loss: f32,
    disc_loss: f32,
    weights: Vec<f32>,
}

impl EpochStats {
    fn add(&mut self, stats: &TrainStepStats) {
        self.steps += 1;
        self.gen_loss += stats.mean_gen_loss();
        self.disc_loss += stats.disc_loss;
        self.weights.resize(stats.weights.len(), 0.0);
        for (acc, w) in self.weights.iter_mut().zip(&stats.weights) {
            *acc += w;
        }
    }

    fn means(&self) -> (f32, f32, Vec<f32>) {
        let n = self.steps.max(1) as f32;
        (
            self.gen_loss / n,
            self.disc_loss / n,
            self.weights.iter().map(|w| w / n).collect(),
        )
    }
}

/// Run a full training process, reporting progress as a stream of messages.
pub fn train_stream_process<B: AutodiffBackend>(
    config: TrainStreamConfig,
    device: B::Device,
) -> impl Stream<Item = Result<ProcessMessage, anyhow::Error>> + 'static {
    try_fn_stream(|emitter| async move {
        emitter.emit(ProcessMessage::NewProcess).await;
        train_stream::<B>(config, device, emitter).await
    })
}

pub(crate) async fn train_stream<B: AutodiffBackend>(
    config: TrainStreamConfig,
    device: B::Device,
    emitter: TryStreamEmitter<ProcessMessage, anyhow::Error>,
) -> anyhow::Result<()> {
    log::info!("Start of training stream");

    emitter
        .emit(ProcessMessage::TrainMessage(TrainMessage::TrainConfig {
            config: Box::new(config.clone()),
        }))
        .await;

    let process_config = &config.process_config;
    let train_config = &config.train_config;
    let eval_config = &config.eval_config;
    let kind = config.load_config.dataset;

    log::info!("Using seed {}", process_config.seed);
    B::seed(&device, process_config.seed);

    log::info!("Loading {}", kind.name());
    let train = load_dataset(&config.load_config, Split::Train)
        .instrument(trace_span!("Load train split"))
        .await
        .context("Failed to load training data")?;
    let test = load_dataset(&config.load_config, Split::Test)
        .instrument(trace_span!("Load test split"))
        .await
        .context("Failed to load test data")?;

    emitter
        .emit(ProcessMessage::TrainMessage(TrainMessage::Dataset {
            kind,
            train_samples: train.len(),
            test_samples: test.len(),
        }))
        .await;

    let fid_model_path = eval_config.fid_model_path.as_ref().context(
        "A pretrained classifier is needed to compute FID. Use --fid-model-path to specify it",
    )?;
    let classifier_config = FidClassifierConfig::new(kind, eval_config.fid_model);
    let classifier = load_classifier::<B::InnerBackend>(&classifier_config, fid_model_path, &device)
        .with_context(|| format!("Failed to load classifier {}", fid_model_path.display()))?;

    let data_stats = test_statistics(
        &classifier,
        &test,
        eval_config.eval_batch_size,
        &eval_config.data_stat_path,
        &device,
    )
    .await
    .context("Failed to get test data statistics")?;
    drop(test);

    let mut gan = create_gan::<B>(&config.model_config, kind, &device);
    let mut trainer = GanTrainer::new(train_config, gan.num_discriminators(), &device);
    let mut state = TrainerState::default();

    let checkpoint_dir = process_config.checkpoint_path.clone();
    if let Some(epoch) = process_config.checkpoint_epoch {
        let (loaded, loaded_state) = load_checkpoint(gan, &checkpoint_dir, epoch, &device)
            .await
            .with_context(|| format!("Failed to resume from epoch {epoch}"))?;
        gan = loaded;
        trainer.set_state(loaded_state.aggregator.clone());
        state = loaded_state;
    }

    log::info!(
        "Train mode is {} with {} {:?} discriminators",
        train_config.train_mode.display_name(),
        gan.num_discriminators(),
        config.model_config.disc_mode
    );
    emitter.emit(ProcessMessage::DoneLoading).await;

    let mut loader = BatchLoader::new(
        Arc::new(train),
        config.load_config.batch_size,
        config.load_config.shuffle,
        config.load_config.hflip(),
        process_config.seed,
    );
    loader.set_epoch(state.epoch as u64);
    let iters_per_epoch = loader.num_batches();

    // Sample grids always show the same latents.
    let grid_noise = gan
        .generator
        .noise(process_config.grid_samples, &device)
        .inner();

    let mut train_duration = Duration::from_secs(0);

    log::info!("Start training loop.");
    for epoch in state.epoch..train_config.epochs {
        let mut batches = loader.epoch::<B>(&device);
        let mut epoch_stats = EpochStats::default();
        let mut iter = 0;

        while let Some(batch) = batches
            .next_batch()
            .instrument(trace_span!("Wait for next data batch"))
            .await
        {
            let step_time = Instant::now();
            let (new_gan, stats) = trainer.step(&batch, gan);
            gan = new_gan;
            train_duration += step_time.elapsed();

            epoch_stats.add(&stats);
            iter += 1;

            if iter % UPDATE_EVERY == 0 || iter == iters_per_epoch {
                emitter
                    .emit(ProcessMessage::TrainMessage(TrainMessage::TrainStep {
                        epoch: epoch + 1,
                        iter,
                        iters_per_epoch,
                        stats,
                        total_elapsed: train_duration,
                    }))
                    .await;
            }
        }

        // We just finished epoch 'epoch', now at epoch + 1.
        let epoch = epoch + 1;
        let is_last_epoch = epoch == train_config.epochs;

        let (gen_loss, disc_loss, weights) = epoch_stats.means();
        state.epoch = epoch;
        state.aggregator = trainer.state().clone();
        state.history.gen_loss.push(gen_loss);
        state.history.disc_loss.push(disc_loss);
        state.history.weights.push(weights);

        log::info!(
            "Epoch {epoch}: generator loss {gen_loss:.4}, discriminator loss {disc_loss:.4}"
        );
        emitter
            .emit(ProcessMessage::TrainMessage(TrainMessage::EpochDone {
                epoch,
                total_epochs: train_config.epochs,
                gen_loss,
                disc_loss,
            }))
            .await;

        let generator = gan.generator.valid();
        let res = run_eval::<B>(
            &emitter,
            &config,
            &generator,
            &classifier,
            &data_stats,
            &mut state,
            &device,
        )
        .await
        .with_context(|| format!("Failed evaluation at epoch {epoch}"));

        if let Err(error) = res {
            emitter.emit(ProcessMessage::Warning { error }).await;
        }

        if epoch.is_multiple_of(process_config.save_every.max(1)) || is_last_epoch {
            let res =
                export_checkpoint(gan.clone(), &generator, &grid_noise, &state, &checkpoint_dir)
                    .await
                    .with_context(|| format!("Checkpoint at epoch {epoch} failed"));

            match res {
                Ok(path) => {
                    emitter
                        .emit(ProcessMessage::TrainMessage(TrainMessage::Checkpoint {
                            epoch,
                            path,
                        }))
                        .await;
                }
                Err(error) => emitter.emit(ProcessMessage::Warning { error }).await,
            }
        }
    }

    emitter
        .emit(ProcessMessage::TrainMessage(TrainMessage::DoneTraining))
        .await;
    Ok(())
}

async fn run_eval<B: AutodiffBackend>(
    emitter: &TryStreamEmitter<ProcessMessage, anyhow::Error>,
    config: &TrainStreamConfig,
    generator: &Generator<B::InnerBackend>,
    classifier: &FidClassifier<B::InnerBackend>,
    data_stats: &GaussianStats,
    state: &mut TrainerState,
    device: &B::Device,
) -> anyhow::Result<()> {
    let eval_config = &config.eval_config;
    let epoch = state.epoch;
    log::info!("Running evaluation for epoch {epoch}");

    let fid = compute_fid(
        generator,
        classifier,
        eval_config.eval_batch_size,
        eval_config.fid_samples,
        data_stats,
        device,
    )?;
    state.history.fid.push(fid);

    let best = state.best_fid.is_none_or(|b| fid < b);
    if best {
        state.best_fid = Some(fid);
        let dir = &config.process_config.checkpoint_path;
        tokio::fs::create_dir_all(dir).await?;
        save_generator(
            generator.clone(),
            &best_generator_path(dir, config.train_config.train_mode),
        )?;
    }

    log::info!("Epoch {epoch}: FID {fid:.4}{}", if best { " (best)" } else { "" });
    emitter
        .emit(ProcessMessage::TrainMessage(TrainMessage::EvalResult {
            epoch,
            fid,
            best,
        }))
        .await;
    Ok(())
}

async fn export_checkpoint<B: AutodiffBackend>(
    gan: Gan<B>,
    generator: &Generator<B::InnerBackend>,
    grid_noise: &burn::tensor::Tensor<B::InnerBackend, 2>,
    state: &TrainerState,
    dir: &Path,
) -> anyhow::Result<std::path::PathBuf> {
    let path = save_checkpoint(gan, state, dir).await?;

    let samples = generator.forward(grid_noise.clone());
    let per_row = (grid_noise.dims()[0] as f64).sqrt().ceil() as usize;
    save_sample_grid(samples, per_row, &dir.join(format!("samples_{}.png", state.epoch)))
        .await
        .context("Saving sample grid")?;
    Ok(path)
}
