use serde::{Deserialize, Serialize};

/// Host-side summary of a single training step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainStepStats {
    /// The aggregated loss the generator was updated with.
    pub gen_loss: f32,
    /// Generator loss against each discriminator.
    pub gen_losses: Vec<f32>,
    /// Mean discriminator loss.
    pub disc_loss: f32,
    pub disc_losses: Vec<f32>,
    /// Weight of each discriminator in the generator update, sums to one.
    pub weights: Vec<f32>,
    /// Nadir point, only set in hyper mode.
    pub nadir: Option<f32>,
}

impl TrainStepStats {
    pub fn mean_gen_loss(&self) -> f32 {
        self.gen_losses.iter().sum::<f32>() / self.gen_losses.len() as f32
    }
}
