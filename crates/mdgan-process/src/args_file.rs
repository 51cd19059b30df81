use std::{collections::BTreeSet, path::Path};

use clap::{ArgMatches, Parser, parser::ValueSource};
use serde_json::Value;

use crate::config::TrainStreamConfig;

const PROGRAM_NAME: &str = "mdgan";

pub fn split_args_str(content: &str) -> Vec<String> {
    content.split_whitespace().map(|s| s.to_owned()).collect()
}

/// Load a `TrainStreamConfig` from an args.txt file, if there is a usable one.
pub async fn load_config_from_file(path: &Path) -> Option<TrainStreamConfig> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Failed to read args from {}: {e}", path.display());
            return None;
        }
    };

    let file_args = split_args_str(&content);
    if file_args.is_empty() {
        return None;
    }

    log::info!("Loaded settings from {}", path.display());
    let mut all_args = vec![PROGRAM_NAME.to_owned()];
    all_args.extend(file_args);

    match TrainStreamConfig::try_parse_from(&all_args) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Invalid args in {}: {e}", path.display());
            None
        }
    }
}

/// Convert a `TrainStreamConfig` back to command-line argument format for saving.
/// Only includes values that differ from the defaults.
pub fn config_to_args(config: &TrainStreamConfig) -> Vec<String> {
    let config_json = serde_json::to_value(config).unwrap_or(Value::Null);
    let default_json = serde_json::to_value(TrainStreamConfig::default()).unwrap_or(Value::Null);

    let mut args = Vec::new();

    if let (Value::Object(config_map), Value::Object(default_map)) = (config_json, default_json) {
        for (key, value) in config_map {
            if default_map.get(&key) == Some(&value) || value.is_null() {
                continue;
            }

            let arg_name = format!("--{key}");
            match value {
                // Flags are only written when set.
                Value::Bool(b) => {
                    if b {
                        args.push(arg_name);
                    }
                }
                Value::String(s) => args.push(format!("{arg_name} {s}")),
                Value::Number(n) => args.push(format!("{arg_name} {n}")),
                _ => args.push(format!("{arg_name} {value}")),
            }
        }
    }

    args
}

/// Names of the arguments that were given explicitly on the command line, in the
/// kebab-case form used by the serialized config.
pub fn explicit_args(matches: &ArgMatches) -> BTreeSet<String> {
    matches
        .ids()
        .filter(|id| matches.value_source(id.as_str()) == Some(ValueSource::CommandLine))
        .map(|id| id.as_str().replace('_', "-"))
        .collect()
}

/// Merge an initial config (eg. from args.txt) with CLI arguments.
///
/// A CLI value wins when it differs from its default or when it is in `explicit`, so
/// passing a flag with its default value still overrides the file.
pub fn merge_configs(
    initial_config: &TrainStreamConfig,
    cli_config: &TrainStreamConfig,
    explicit: &BTreeSet<String>,
) -> serde_json::Result<TrainStreamConfig> {
    let mut merged = serde_json::to_value(initial_config)?;
    let cli_json = serde_json::to_value(cli_config)?;
    let default_json = serde_json::to_value(TrainStreamConfig::default())?;

    if let (Value::Object(merged_map), Value::Object(cli_map), Value::Object(default_map)) =
        (&mut merged, cli_json, default_json)
    {
        for (key, value) in cli_map {
            if explicit.contains(&key) || default_map.get(&key) != Some(&value) {
                merged_map.insert(key, value);
            }
        }
    }

    serde_json::from_value(merged)
}

/// Write the non-default settings of `config` so a run can be reproduced.
pub async fn save_config_to_file(config: &TrainStreamConfig, path: &Path) -> std::io::Result<()> {
    tokio::fs::write(path, config_to_args(config).join("\n")).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};
    use mdgan_dataset::DatasetKind;
    use mdgan_train::config::{DiscMode, TrainMode};

    fn parse(args: &[String]) -> TrainStreamConfig {
        let mut cli_args = vec![PROGRAM_NAME.to_owned()];
        for arg in args {
            cli_args.extend(split_args_str(arg));
        }
        TrainStreamConfig::try_parse_from(&cli_args).expect("Should parse")
    }

    #[test]
    fn config_to_args_only_includes_changes() {
        let mut config = TrainStreamConfig::default();
        config.train_config.epochs = 10;
        config.model_config.disc_mode = DiscMode::Md;
        config.load_config.max_samples = Some(100);
        let args = config_to_args(&config);

        assert_eq!(args.len(), 3, "Should have 3 args, got: {args:?}");
        let args_str = args.join(" ");
        assert!(args_str.contains("--epochs 10"), "Missing epochs");
        assert!(args_str.contains("--disc-mode md"), "Missing disc-mode");
        assert!(args_str.contains("--max-samples 100"), "Missing max-samples");
    }

    #[test]
    fn config_round_trip() {
        let mut saved = TrainStreamConfig::default();
        saved.train_config.train_mode = TrainMode::GmanGrad;
        saved.train_config.lr = 1e-3;
        saved.load_config.dataset = DatasetKind::Cifar10;
        saved.load_config.shuffle = true;
        saved.eval_config.fid_model_path = Some("classifier.mpk".into());
        saved.process_config.seed = 123;

        let parsed = parse(&config_to_args(&saved));
        assert_eq!(parsed.train_config.train_mode, TrainMode::GmanGrad);
        assert_eq!(parsed.train_config.lr, 1e-3);
        assert_eq!(parsed.load_config.dataset, DatasetKind::Cifar10);
        assert!(parsed.load_config.shuffle);
        assert_eq!(
            parsed.eval_config.fid_model_path,
            Some("classifier.mpk".into())
        );
        assert_eq!(parsed.process_config.seed, 123);
    }

    #[test]
    fn cli_wins_over_file() {
        let mut file = TrainStreamConfig::default();
        file.train_config.epochs = 10;
        file.model_config.ndiscriminators = 4;

        let mut cli = TrainStreamConfig::default();
        cli.train_config.epochs = 20;

        let merged = merge_configs(&file, &cli, &BTreeSet::new()).unwrap();
        assert_eq!(merged.train_config.epochs, 20);
        assert_eq!(merged.model_config.ndiscriminators, 4);
    }

    #[test]
    fn explicit_default_value_wins_over_file() {
        let mut file = TrainStreamConfig::default();
        file.train_config.epochs = 10;
        file.train_config.train_mode = TrainMode::Hyper;
        file.load_config.shuffle = true;

        let matches = TrainStreamConfig::command()
            .try_get_matches_from([PROGRAM_NAME, "--epochs", "50", "--disc-mode", "md"])
            .unwrap();
        let cli = TrainStreamConfig::from_arg_matches(&matches).unwrap();
        let explicit = explicit_args(&matches);
        assert!(explicit.contains("epochs"));
        assert!(explicit.contains("disc-mode"));
        assert!(!explicit.contains("train-mode"));

        let merged = merge_configs(&file, &cli, &explicit).unwrap();
        // 50 is the default, but it was passed explicitly.
        assert_eq!(merged.train_config.epochs, 50);
        assert_eq!(merged.model_config.disc_mode, DiscMode::Md);
        assert_eq!(merged.train_config.train_mode, TrainMode::Hyper);
        assert!(merged.load_config.shuffle);
    }

    #[tokio::test]
    async fn reads_args_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("args.txt");

        let mut config = TrainStreamConfig::default();
        config.train_config.train_mode = TrainMode::Hyper;
        config.train_config.nadir_slack = 2.0;
        save_config_to_file(&config, &path).await.unwrap();

        let loaded = load_config_from_file(&path).await.expect("Should load");
        assert_eq!(loaded.train_config.train_mode, TrainMode::Hyper);
        assert_eq!(loaded.train_config.nadir_slack, 2.0);

        assert!(load_config_from_file(&dir.path().join("missing.txt")).await.is_none());
    }
}
