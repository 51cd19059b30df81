use std::time::Duration;

use anyhow::Context;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mdgan_process::message::{ProcessMessage, TrainMessage};
use tokio_stream::{Stream, StreamExt};

/// Drive a training stream to completion, showing progress in the terminal.
pub async fn process_ui(
    stream: impl Stream<Item = anyhow::Result<ProcessMessage>>,
    multi: MultiProgress,
) -> anyhow::Result<()> {
    let mut stream = std::pin::pin!(stream);

    let spinner = multi.add(ProgressBar::new_spinner().with_message("Loading data and models"));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let train_bar = ProgressBar::new(0).with_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {prefix} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );

    let mut total_epochs = 0;
    let mut train_time = Duration::ZERO;

    while let Some(message) = stream.next().await {
        let message = message.inspect_err(|_| {
            spinner.finish_and_clear();
            train_bar.abandon();
        })?;

        match message {
            ProcessMessage::NewProcess => {
                log::info!("Starting process");
            }
            ProcessMessage::DoneLoading => {
                spinner.finish_and_clear();
                multi.add(train_bar.clone());
            }
            ProcessMessage::Warning { error } => {
                log::warn!("{error:#}");
            }
            ProcessMessage::TrainMessage(train) => match train {
                TrainMessage::TrainConfig { config } => {
                    total_epochs = config.train_config.epochs;
                    log::info!(
                        "Training for {total_epochs} epochs in {} mode",
                        config.train_config.train_mode.display_name()
                    );
                }
                TrainMessage::Dataset {
                    kind,
                    train_samples,
                    test_samples,
                } => {
                    log::info!(
                        "Loaded {}: {train_samples} train and {test_samples} test images",
                        kind.name()
                    );
                }
                TrainMessage::TrainStep {
                    epoch,
                    iter,
                    iters_per_epoch,
                    stats,
                    total_elapsed,
                } => {
                    train_time = total_elapsed;
                    train_bar.set_length(total_epochs as u64 * iters_per_epoch as u64);
                    train_bar.set_position(
                        (epoch - 1) as u64 * iters_per_epoch as u64 + iter as u64,
                    );

                    let weights = stats
                        .weights
                        .iter()
                        .map(|w| format!("{w:.2}"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    let nadir = stats
                        .nadir
                        .map(|n| format!(" nadir {n:.3}"))
                        .unwrap_or_default();
                    train_bar.set_message(format!(
                        "G {:.4} D {:.4}{nadir} w [{weights}]",
                        stats.gen_loss, stats.disc_loss
                    ));
                }
                TrainMessage::EpochDone { .. } => {}
                TrainMessage::EvalResult { fid, best, .. } => {
                    let marker = if best { "*" } else { "" };
                    train_bar.set_prefix(format!("FID {fid:.3}{marker}"));
                }
                TrainMessage::Checkpoint { epoch, path } => {
                    log::info!("Epoch {epoch} checkpoint saved to {}", path.display());
                }
                TrainMessage::DoneTraining => {
                    let elapsed = Duration::from_secs(train_time.as_secs());
                    train_bar.finish_with_message(format!(
                        "Training took {}",
                        humantime::format_duration(elapsed)
                    ));
                }
            },
        }
    }

    Ok(())
}
