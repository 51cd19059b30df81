use std::path::PathBuf;

use clap::{Args, Parser};
use mdgan_dataset::LoadDatasetConfig;
use mdgan_eval::config::EvalConfig;
use mdgan_train::config::{ModelConfig, TrainConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessConfig {
    /// Random seed.
    #[arg(long, help_heading = "Process options", default_value = "1")]
    pub seed: u64,
    /// Checkpoint and save samples every this many epochs.
    #[arg(long, help_heading = "Process options", default_value = "5")]
    pub save_every: u32,
    /// Directory for checkpoints, sample grids and the best generator.
    #[arg(long, help_heading = "Process options", default_value = "./checkpoints")]
    pub checkpoint_path: PathBuf,
    /// Epoch to resume from. Starts from scratch if unset.
    #[arg(long, help_heading = "Process options")]
    pub checkpoint_epoch: Option<u32>,
    /// Number of samples in the saved sample grids.
    #[arg(long, help_heading = "Process options", default_value = "64")]
    pub grid_samples: usize,
}

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrainStreamConfig {
    #[clap(flatten)]
    #[serde(flatten)]
    pub train_config: TrainConfig,
    #[clap(flatten)]
    #[serde(flatten)]
    pub model_config: ModelConfig,
    #[clap(flatten)]
    #[serde(flatten)]
    pub load_config: LoadDatasetConfig,
    #[clap(flatten)]
    #[serde(flatten)]
    pub eval_config: EvalConfig,
    #[clap(flatten)]
    #[serde(flatten)]
    pub process_config: ProcessConfig,
}

impl Default for TrainStreamConfig {
    fn default() -> Self {
        Self::parse_from([""])
    }
}

#[derive(Clone, Debug, Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompareConfig {
    /// Folder with the `G_<mode>_*.mpk` generators to compare.
    #[arg(long, help_heading = "Compare options", default_value = "./checkpoints")]
    pub cp_folder: PathBuf,
    /// Number of FID evaluations per generator.
    #[arg(long, help_heading = "Compare options", default_value = "30")]
    pub ntests: usize,
    /// Generated samples per FID evaluation.
    #[arg(long, help_heading = "Compare options", default_value = "10000")]
    pub nsamples: usize,
}
