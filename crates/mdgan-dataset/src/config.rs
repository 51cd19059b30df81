use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::DatasetKind;

fn parse_batch_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("Batch size must be at least 1".to_owned()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("Invalid batch size '{s}': {e}")),
    }
}

#[derive(Clone, Debug, Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadDatasetConfig {
    /// Dataset to train on.
    #[arg(long, help_heading = "Dataset Options", value_enum, default_value = "mnist")]
    pub dataset: DatasetKind,
    /// Directory containing the raw dataset files (MNIST idx files or CIFAR-10 binary batches).
    #[arg(long, help_heading = "Dataset Options", default_value = "./data")]
    pub data_path: PathBuf,
    /// Max nr. of samples to load from each split.
    #[arg(long, help_heading = "Dataset Options")]
    pub max_samples: Option<usize>,
    /// Input batch size for training.
    #[arg(
        long,
        help_heading = "Dataset Options",
        default_value = "64",
        value_parser = parse_batch_size
    )]
    pub batch_size: usize,
    /// Reshuffle the training set at the start of every epoch.
    #[arg(long, help_heading = "Dataset Options", default_value = "false")]
    pub shuffle: bool,
    /// Disable random horizontal flips. Flips are only ever applied to CIFAR-10.
    #[arg(long, help_heading = "Dataset Options", default_value = "false")]
    pub no_hflip: bool,
}

impl LoadDatasetConfig {
    pub fn hflip(&self) -> bool {
        !self.no_hflip && self.dataset == DatasetKind::Cifar10
    }
}

#[cfg(test)]
mod tests {
    use super::parse_batch_size;

    #[test]
    fn batch_size_rejects_zero() {
        assert!(parse_batch_size("0").is_err());
        assert!(parse_batch_size("many").is_err());
    }

    #[test]
    fn batch_size_allows_numbers() {
        assert_eq!(parse_batch_size("64").unwrap(), 64);
    }
}
