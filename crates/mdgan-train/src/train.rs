use burn::{
    module::AutodiffModule,
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    prelude::Backend,
    tensor::{ElementConversion, Tensor, TensorData, backend::AutodiffBackend},
};
use mdgan_dataset::batch_loader::ImageBatch;
use tracing::trace_span;

use crate::{
    aggregate::{
        AggregatorState, hypervolume_weights, min_norm_weights, nadir_point, softmax_weights,
        uniform_weights,
    },
    config::{TrainConfig, TrainMode},
    discriminator::Discriminator,
    gan::Gan,
    generator::Generator,
    grads::{dot, flat_grads, gram_matrix},
    loss::bce_with_logits,
    msg::TrainStepStats,
};

pub(crate) const MGD_MAX_ITERS: usize = 250;
pub(crate) const MGD_TOL: f64 = 1e-6;

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f32 {
    t.clone().into_scalar().elem::<f32>()
}

/// Generator losses of a frozen snapshot on fixed noise.
fn snapshot_losses<B: AutodiffBackend>(
    generator: &Generator<B::InnerBackend>,
    discriminators: &[Discriminator<B>],
    z: Tensor<B::InnerBackend, 2>,
) -> Vec<f32> {
    let fake = generator.forward(z);
    discriminators
        .iter()
        .map(|d| scalar(&bce_with_logits(d.valid().forward(fake.clone()), true)))
        .collect()
}

struct GeneratorUpdate {
    loss: f32,
    losses: Vec<f32>,
    weights: Vec<f32>,
    nadir: Option<f32>,
}

pub struct GanTrainer<B: AutodiffBackend> {
    config: TrainConfig,
    gen_optim: OptimizerAdaptor<Adam, Generator<B>, B>,
    disc_optims: Vec<OptimizerAdaptor<Adam, Discriminator<B>, B>>,
    state: AggregatorState,
    device: B::Device,
}

impl<B: AutodiffBackend> GanTrainer<B> {
    pub fn new(config: &TrainConfig, num_discriminators: usize, device: &B::Device) -> Self {
        let adam = AdamConfig::new()
            .with_beta_1(config.beta1)
            .with_beta_2(config.beta2);

        Self {
            config: config.clone(),
            gen_optim: adam.init(),
            disc_optims: (0..num_discriminators).map(|_| adam.init()).collect(),
            state: AggregatorState::default(),
            device: device.clone(),
        }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn state(&self) -> &AggregatorState {
        &self.state
    }

    /// Restore the aggregation state, eg. when resuming from a checkpoint.
    pub fn set_state(&mut self, state: AggregatorState) {
        self.state = state;
    }

    /// One update of every discriminator followed by one generator update.
    pub fn step(&mut self, batch: &ImageBatch<B>, gan: Gan<B>) -> (Gan<B>, TrainStepStats) {
        let Gan {
            generator,
            discriminators,
        } = gan;
        assert_eq!(
            discriminators.len(),
            self.disc_optims.len(),
            "Trainer was created for a different number of discriminators"
        );

        let (discriminators, disc_losses) = trace_span!("Discriminator step")
            .in_scope(|| self.discriminator_step(&generator, discriminators, &batch.images));

        let (generator, update) = trace_span!("Generator step")
            .in_scope(|| self.generator_step(generator, &discriminators, batch.batch_size()));

        let stats = TrainStepStats {
            gen_loss: update.loss,
            gen_losses: update.losses,
            disc_loss: disc_losses.iter().sum::<f32>() / disc_losses.len() as f32,
            disc_losses,
            weights: update.weights,
            nadir: update.nadir,
        };

        (
            Gan {
                generator,
                discriminators,
            },
            stats,
        )
    }

    fn discriminator_step(
        &mut self,
        generator: &Generator<B>,
        discriminators: Vec<Discriminator<B>>,
        real: &Tensor<B, 4>,
    ) -> (Vec<Discriminator<B>>, Vec<f32>) {
        let n = real.dims()[0];
        let fake = generator.sample(n, &self.device).detach();

        let mut losses = Vec::with_capacity(discriminators.len());
        let mut updated = Vec::with_capacity(discriminators.len());

        for (disc, optim) in discriminators.into_iter().zip(&mut self.disc_optims) {
            let loss = bce_with_logits(disc.forward(real.clone()), true)
                + bce_with_logits(disc.forward(fake.clone()), false);
            losses.push(scalar(&loss));

            let grads = GradientsParams::from_grads(loss.backward(), &disc);
            updated.push(optim.step(self.config.lr, disc, grads));
        }

        (updated, losses)
    }

    /// Weights from per discriminator generator gradients, for the modes that need them.
    ///
    /// Each discriminator needs its own graph, the extra forward passes leave the batch norm
    /// running statistics alone.
    pub(crate) fn gradient_weights(
        &self,
        generator: &Generator<B>,
        discriminators: &[Discriminator<B>],
        z: &Tensor<B, 2>,
    ) -> Vec<f32> {
        let n = discriminators.len();
        let flat: Option<Vec<_>> = discriminators
            .iter()
            .map(|disc| {
                let loss = bce_with_logits(disc.forward(generator.forward_keep_stats(z.clone())), true);
                flat_grads(generator, &loss.backward())
            })
            .collect();

        let Some(flat) = flat else {
            log::warn!("Generator received no gradients, falling back to uniform weights");
            return uniform_weights(n);
        };

        match self.config.train_mode {
            TrainMode::GmanGrad => {
                let norms: Vec<f32> = flat
                    .into_iter()
                    .map(|g| dot(g.clone(), g).sqrt() as f32)
                    .collect();
                softmax_weights(&norms, self.config.alpha)
            }
            _ => min_norm_weights(&gram_matrix(&flat), MGD_MAX_ITERS, MGD_TOL),
        }
    }

    fn generator_step(
        &mut self,
        generator: Generator<B>,
        discriminators: &[Discriminator<B>],
        batch_size: usize,
    ) -> (Generator<B>, GeneratorUpdate) {
        let mode = self.config.train_mode;
        let n = discriminators.len();
        let z = generator.noise(batch_size, &self.device);

        // Loss delta compares the losses on a held out batch before and after the update.
        let held_out = (mode == TrainMode::LossDelta).then(|| {
            let z = generator.noise(batch_size, &self.device).inner();
            let before = snapshot_losses(&generator.valid(), discriminators, z.clone());
            (z, before)
        });

        let grad_weights = mode
            .needs_grads()
            .then(|| self.gradient_weights(&generator, discriminators, &z));

        let fake = generator.forward(z);
        let losses: Vec<Tensor<B, 1>> = discriminators
            .iter()
            .map(|d| bce_with_logits(d.forward(fake.clone()), true))
            .collect();
        let values: Vec<f32> = losses.iter().map(scalar).collect();
        let losses = Tensor::cat(losses, 0);

        let mut nadir = None;
        let weights = match mode {
            TrainMode::Vanilla => uniform_weights(n),
            TrainMode::Hyper => {
                let point = nadir_point(&values, self.config.nadir_slack);
                nadir = Some(point);
                hypervolume_weights(&values, point)
            }
            TrainMode::Gman => softmax_weights(&values, self.config.alpha),
            TrainMode::GmanGrad | TrainMode::Mgd => {
                grad_weights.unwrap_or_else(|| uniform_weights(n))
            }
            TrainMode::LossDelta => self.state.loss_delta_weights(n, self.config.alpha),
        };

        let loss = match nadir {
            // -sum(log(nadir - l_i))
            Some(point) => losses.neg().add_scalar(point).log().sum().neg(),
            None => {
                let w = TensorData::new(weights.clone(), [n]);
                (losses * Tensor::from_data(w, &self.device)).sum()
            }
        };
        let loss_value = scalar(&loss);

        let grads = GradientsParams::from_grads(loss.backward(), &generator);
        let generator = self.gen_optim.step(self.config.lr, generator, grads);

        self.state.nadir = nadir;
        if let Some((z, before)) = held_out {
            let after = snapshot_losses(&generator.valid(), discriminators, z);
            self.state.loss_deltas = Some(before.iter().zip(&after).map(|(b, a)| b - a).collect());
        }

        (
            generator,
            GeneratorUpdate {
                loss: loss_value,
                losses: values,
                weights,
                nadir,
            },
        )
    }
}
