use std::path::PathBuf;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(
    Default, ValueEnum, Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierArch {
    Mlp,
    #[default]
    Cnn,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvalConfig {
    /// Pretrained classifier used for FID features. Either a .mpk record or a
    /// PyTorch state dict (.pt/.pth) with the weights under `model_state`.
    #[arg(long, help_heading = "Eval options")]
    pub fid_model_path: Option<PathBuf>,

    /// Architecture of the FID classifier.
    #[arg(long, help_heading = "Eval options", value_enum, default_value = "cnn")]
    pub fid_model: ClassifierArch,

    /// Cached feature statistics of the test set. Computed if missing.
    #[arg(
        long,
        help_heading = "Eval options",
        default_value = "./test_data_statistics.json"
    )]
    pub data_stat_path: PathBuf,

    /// Number of generated samples per FID evaluation.
    #[arg(long, help_heading = "Eval options", default_value = "1000")]
    pub fid_samples: usize,

    /// Batch size for generating and classifying samples during evaluation.
    #[arg(long, help_heading = "Eval options", default_value = "512")]
    pub eval_batch_size: usize,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassifierTrainConfig {
    /// Epochs to train the FID classifier for.
    #[arg(long, help_heading = "Classifier options", default_value = "10")]
    pub classifier_epochs: u32,

    /// Learning rate of the classifier.
    #[arg(long, help_heading = "Classifier options", default_value = "1e-3")]
    pub classifier_lr: f64,
}
