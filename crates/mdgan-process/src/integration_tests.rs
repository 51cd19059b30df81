use std::path::Path;

use burn::backend::{Autodiff, NdArray};
use mdgan_dataset::DatasetKind;
use mdgan_eval::{
    classifier::{FidClassifierConfig, save_classifier},
    config::ClassifierArch,
};
use mdgan_train::config::TrainMode;
use tokio_stream::StreamExt;

use crate::{
    checkpoint::{best_generator_path, checkpoint_paths},
    config::TrainStreamConfig,
    message::{ProcessMessage, TrainMessage},
    train_stream::train_stream_process,
};

type DiffBackend = Autodiff<NdArray>;

fn idx_images(count: usize) -> Vec<u8> {
    let mut bytes = vec![];
    for word in [2051u32, count as u32, 28, 28] {
        bytes.extend(word.to_be_bytes());
    }
    // Every image is a different flat gray level.
    for i in 0..count {
        bytes.extend(std::iter::repeat_n((i * 17 % 256) as u8, 28 * 28));
    }
    bytes
}

fn idx_labels(count: usize) -> Vec<u8> {
    let mut bytes = vec![];
    bytes.extend(2049u32.to_be_bytes());
    bytes.extend((count as u32).to_be_bytes());
    bytes.extend((0..count).map(|i| (i % 10) as u8));
    bytes
}

async fn write_mnist(dir: &Path) {
    for (prefix, count) in [("train", 16), ("t10k", 12)] {
        tokio::fs::write(dir.join(format!("{prefix}-images-idx3-ubyte")), idx_images(count))
            .await
            .unwrap();
        tokio::fs::write(dir.join(format!("{prefix}-labels-idx1-ubyte")), idx_labels(count))
            .await
            .unwrap();
    }
}

fn small_config(dir: &Path) -> TrainStreamConfig {
    let mut config = TrainStreamConfig::default();
    config.train_config.epochs = 2;
    config.model_config.ndiscriminators = 2;
    config.model_config.z_dim = 8;
    config.model_config.proj_dim = 16;
    config.load_config.data_path = dir.to_path_buf();
    config.load_config.batch_size = 8;
    config.eval_config.fid_model_path = Some(dir.join("classifier.mpk"));
    config.eval_config.fid_model = ClassifierArch::Mlp;
    config.eval_config.data_stat_path = dir.join("stats.json");
    config.eval_config.fid_samples = 16;
    config.eval_config.eval_batch_size = 8;
    config.process_config.checkpoint_path = dir.join("checkpoints");
    config.process_config.save_every = 1;
    config.process_config.grid_samples = 4;
    config
}

#[derive(Default)]
struct Summary {
    epochs_done: Vec<u32>,
    fids: Vec<f64>,
    checkpoints: usize,
    warnings: Vec<String>,
    done: bool,
}

async fn run(config: TrainStreamConfig) -> anyhow::Result<Summary> {
    let stream = train_stream_process::<DiffBackend>(config, Default::default());
    let mut stream = std::pin::pin!(stream);
    let mut summary = Summary::default();

    while let Some(message) = stream.next().await {
        match message? {
            ProcessMessage::TrainMessage(TrainMessage::TrainStep { stats, .. }) => {
                assert!(stats.gen_loss.is_finite());
                assert_eq!(stats.weights.len(), 2);
            }
            ProcessMessage::TrainMessage(TrainMessage::EpochDone { epoch, .. }) => {
                summary.epochs_done.push(epoch);
            }
            ProcessMessage::TrainMessage(TrainMessage::EvalResult { fid, .. }) => {
                summary.fids.push(fid);
            }
            ProcessMessage::TrainMessage(TrainMessage::Checkpoint { .. }) => {
                summary.checkpoints += 1;
            }
            ProcessMessage::TrainMessage(TrainMessage::DoneTraining) => summary.done = true,
            ProcessMessage::Warning { error } => summary.warnings.push(format!("{error:?}")),
            _ => {}
        }
    }
    Ok(summary)
}

#[tokio::test]
async fn trains_evaluates_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    write_mnist(dir.path()).await;

    let device = Default::default();
    let classifier = FidClassifierConfig::new(DatasetKind::Mnist, ClassifierArch::Mlp)
        .init::<NdArray>(&device);
    save_classifier(classifier, &dir.path().join("classifier.mpk")).unwrap();

    let config = small_config(dir.path());
    let summary = run(config.clone()).await.unwrap();

    assert!(summary.warnings.is_empty(), "{:?}", summary.warnings);
    assert!(summary.done);
    assert_eq!(summary.epochs_done, vec![1, 2]);
    assert_eq!(summary.fids.len(), 2);
    assert!(summary.fids.iter().all(|f| f.is_finite() && *f >= 0.0));
    assert_eq!(summary.checkpoints, 2);

    let cp_dir = dir.path().join("checkpoints");
    let (model, state) = checkpoint_paths(&cp_dir, 2);
    assert!(model.exists() && state.exists());
    assert!(best_generator_path(&cp_dir, TrainMode::Vanilla).exists());
    assert!(cp_dir.join("samples_2.png").exists());
    assert!(dir.path().join("stats.json").exists());

    // Resume for one more epoch.
    let mut resumed = config;
    resumed.train_config.epochs = 3;
    resumed.process_config.checkpoint_epoch = Some(2);
    let summary = run(resumed).await.unwrap();
    assert!(summary.warnings.is_empty(), "{:?}", summary.warnings);
    assert_eq!(summary.epochs_done, vec![3]);
    assert!(checkpoint_paths(&cp_dir, 3).0.exists());
}

#[tokio::test]
async fn missing_classifier_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_mnist(dir.path()).await;

    let mut config = small_config(dir.path());
    config.eval_config.fid_model_path = None;
    let err = run(config).await.err().expect("Training without a classifier should fail");
    assert!(format!("{err:#}").contains("--fid-model-path"));
}
