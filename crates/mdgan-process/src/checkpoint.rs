use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::{
    module::Module,
    prelude::Backend,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::Device,
};
use mdgan_train::{
    aggregate::AggregatorState,
    config::TrainMode,
    gan::{Gan, GanRecord},
    generator::Generator,
};
use serde::{Deserialize, Serialize};

/// Per epoch history of a training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub gen_loss: Vec<f32>,
    pub disc_loss: Vec<f32>,
    /// Mean weight of every discriminator over the epoch.
    pub weights: Vec<Vec<f32>>,
    pub fid: Vec<f64>,
}

/// Everything besides the model weights needed to resume training.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    /// Number of completed epochs.
    pub epoch: u32,
    pub aggregator: AggregatorState,
    pub history: History,
    pub best_fid: Option<f64>,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

pub fn checkpoint_paths(dir: &Path, epoch: u32) -> (PathBuf, PathBuf) {
    let base = dir.join(format!("checkpoint_{epoch}"));
    (base.with_extension("mpk"), base.with_extension("json"))
}

pub fn best_generator_path(dir: &Path, mode: TrainMode) -> PathBuf {
    dir.join(format!("G_{}_best.mpk", mode.label()))
}

/// Write the full GAN and the trainer state for `state.epoch`.
pub async fn save_checkpoint<B: Backend>(
    gan: Gan<B>,
    state: &TrainerState,
    dir: &Path,
) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Creating checkpoint directory {}", dir.display()))?;

    let (model_path, state_path) = checkpoint_paths(dir, state.epoch);
    gan.save_file(model_path.clone(), &recorder())
        .with_context(|| format!("Failed to save {}", model_path.display()))?;

    let json = serde_json::to_vec_pretty(state).context("Serializing trainer state")?;
    tokio::fs::write(&state_path, json)
        .await
        .with_context(|| format!("Failed to write {}", state_path.display()))?;

    log::info!("Saved checkpoint for epoch {} to {}", state.epoch, dir.display());
    Ok(model_path)
}

/// Restore a checkpoint into `gan`, which has to have the same architecture.
pub async fn load_checkpoint<B: Backend>(
    gan: Gan<B>,
    dir: &Path,
    epoch: u32,
    device: &Device<B>,
) -> anyhow::Result<(Gan<B>, TrainerState)> {
    let (model_path, state_path) = checkpoint_paths(dir, epoch);

    let record: GanRecord<B> = recorder()
        .load(model_path.clone(), device)
        .with_context(|| format!("Failed to load {}", model_path.display()))?;
    anyhow::ensure!(
        record.discriminators.len() == gan.num_discriminators(),
        "Checkpoint {} has {} discriminators, the model has {}",
        model_path.display(),
        record.discriminators.len(),
        gan.num_discriminators()
    );
    let gan = gan.load_record(record);

    let bytes = tokio::fs::read(&state_path)
        .await
        .with_context(|| format!("Failed to read {}", state_path.display()))?;
    let mut state: TrainerState = serde_json::from_slice(&bytes)
        .with_context(|| format!("Invalid trainer state in {}", state_path.display()))?;

    if state
        .aggregator
        .loss_deltas
        .as_ref()
        .is_some_and(|d| d.len() != gan.num_discriminators())
    {
        log::warn!("Checkpoint loss deltas don't match the number of discriminators, resetting");
        state.aggregator.loss_deltas = None;
    }

    log::info!("Resumed from checkpoint at epoch {epoch}");
    Ok((gan, state))
}

pub fn save_generator<B: Backend>(generator: Generator<B>, path: &Path) -> anyhow::Result<()> {
    generator
        .save_file(path.to_path_buf(), &recorder())
        .with_context(|| format!("Failed to save generator {}", path.display()))
}

/// Load generator weights into `generator`, which has to have the same architecture.
pub fn load_generator<B: Backend>(
    generator: Generator<B>,
    path: &Path,
    device: &Device<B>,
) -> anyhow::Result<Generator<B>> {
    generator
        .load_file(path.to_path_buf(), &recorder(), device)
        .with_context(|| format!("Failed to load generator {}", path.display()))
}
