use std::path::PathBuf;

use mdgan_dataset::DatasetKind;
use mdgan_train::msg::TrainStepStats;

use crate::config::TrainStreamConfig;

pub enum TrainMessage {
    /// Training configuration - sent at the start of training.
    TrainConfig { config: Box<TrainStreamConfig> },
    /// Loaded the train and test splits.
    Dataset {
        kind: DatasetKind,
        train_samples: usize,
        test_samples: usize,
    },
    /// Some number of training steps are done.
    TrainStep {
        epoch: u32,
        iter: usize,
        iters_per_epoch: usize,
        stats: TrainStepStats,
        total_elapsed: web_time::Duration,
    },
    /// An epoch finished, with the mean losses over it.
    EpochDone {
        epoch: u32,
        total_epochs: u32,
        gen_loss: f32,
        disc_loss: f32,
    },
    /// FID was evaluated after an epoch.
    EvalResult { epoch: u32, fid: f64, best: bool },
    /// A checkpoint was written.
    Checkpoint { epoch: u32, path: PathBuf },
    DoneTraining,
}

pub enum ProcessMessage {
    /// A new process is starting.
    NewProcess,
    TrainMessage(TrainMessage),
    /// Some warning occurred during the process, but the process can continue.
    Warning { error: anyhow::Error },
    /// Data, classifier and models are loaded, training is about to start.
    DoneLoading,
}
