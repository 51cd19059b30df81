use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// How the generator losses of the individual discriminators are combined.
#[derive(
    Default, ValueEnum, Clone, Copy, Eq, PartialEq, Debug, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TrainMode {
    /// Plain average of the discriminator losses.
    #[default]
    Vanilla,
    /// Hypervolume maximisation against an adaptive nadir point.
    Hyper,
    /// Softmax weighting of the losses (GMAN).
    Gman,
    /// Softmax weighting of the generator gradient norms.
    #[value(alias = "gman_grad")]
    GmanGrad,
    /// Softmax weighting of how much each loss dropped over the last update.
    #[value(alias = "loss_delta")]
    LossDelta,
    /// Min-norm convex combination of the gradients (multiple gradient descent).
    Mgd,
}

impl TrainMode {
    /// Short name used in file names.
    pub fn label(self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::Hyper => "hyper",
            Self::Gman => "gman",
            Self::GmanGrad => "gman_grad",
            Self::LossDelta => "loss_delta",
            Self::Mgd => "mgd",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            Self::Vanilla,
            Self::Hyper,
            Self::Gman,
            Self::GmanGrad,
            Self::LossDelta,
            Self::Mgd,
        ]
        .into_iter()
        .find(|m| m.label() == label)
    }

    /// Name used when reporting results side by side.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Vanilla => "AVG",
            Self::Hyper => "HV",
            Self::Gman => "GMAN",
            Self::GmanGrad => "GMAN-grad",
            Self::LossDelta => "LD",
            Self::Mgd => "MGD",
        }
    }

    /// Whether this mode needs per discriminator generator gradients.
    pub fn needs_grads(self) -> bool {
        matches!(self, Self::GmanGrad | Self::Mgd)
    }
}

#[derive(
    Default, ValueEnum, Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DiscMode {
    /// Identical discriminators, each looking through a different frozen random projection.
    #[default]
    #[value(alias = "RP")]
    Rp,
    /// Architecturally distinct discriminators without projection.
    #[value(alias = "MD")]
    Md,
}

fn parse_nadir_slack(s: &str) -> Result<f32, String> {
    let slack = s
        .parse::<f32>()
        .map_err(|e| format!("Invalid nadir slack '{s}': {e}"))?;
    if slack > 1.0 {
        Ok(slack)
    } else {
        Err(format!("Nadir slack must be > 1, got {slack}"))
    }
}

#[derive(Clone, Debug, Parser, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrainConfig {
    /// Number of epochs to train for.
    #[arg(long, help_heading = "Training options", default_value = "50")]
    pub epochs: u32,

    /// Learning rate of the generator and all discriminators.
    #[arg(long, help_heading = "Training options", default_value = "2e-4")]
    pub lr: f64,

    /// Adam beta1.
    #[arg(long, help_heading = "Training options", default_value = "0.5")]
    pub beta1: f32,

    /// Adam beta2.
    #[arg(long, help_heading = "Training options", default_value = "0.999")]
    pub beta2: f32,

    /// How to combine the losses of the discriminators for the generator update.
    #[arg(long, help_heading = "Training options", value_enum, default_value = "vanilla")]
    pub train_mode: TrainMode,

    /// Factor for the nadir point update. Only used in hyper mode.
    #[arg(
        long,
        help_heading = "Training options",
        default_value = "1.5",
        value_parser = parse_nadir_slack
    )]
    pub nadir_slack: f32,

    /// Softmax temperature used by the gman, gman-grad and loss-delta modes.
    #[arg(long, help_heading = "Training options", default_value = "0.8")]
    pub alpha: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::parse_from([""])
    }
}

#[derive(Clone, Debug, Parser, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelConfig {
    /// Number of discriminators. In md mode the architectures repeat once the catalogue runs out.
    #[arg(long, help_heading = "Model options", default_value = "8")]
    pub ndiscriminators: usize,

    /// Random projections (rp) or distinct architectures (md).
    #[arg(long, help_heading = "Model options", value_enum, default_value = "rp")]
    pub disc_mode: DiscMode,

    /// Size of the latent noise vector.
    #[arg(long, help_heading = "Model options", default_value = "100")]
    pub z_dim: usize,

    /// Output size of the random projections of flat (MNIST) inputs.
    #[arg(long, help_heading = "Model options", default_value = "256")]
    pub proj_dim: usize,

    /// Base width of the convolutional generator.
    #[arg(long, help_heading = "Model options", default_value = "64")]
    pub ngf: usize,

    /// Base width of the convolutional discriminators.
    #[arg(long, help_heading = "Model options", default_value = "64")]
    pub ndf: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::parse_from([""])
    }
}
