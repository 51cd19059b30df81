use burn::{
    config::Config,
    module::Module,
    nn::{
        BatchNorm, BatchNormConfig, Linear, LinearConfig,
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::Backend,
    tensor::{Device, Distribution, Tensor, activation},
};
use mdgan_dataset::DatasetKind;

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub dataset: DatasetKind,
    #[config(default = 100)]
    pub z_dim: usize,
    /// Base width of the convolutional generator.
    #[config(default = 64)]
    pub ngf: usize,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Generator<B> {
        let [channels, height, width] = self.dataset.dims();

        let (mlp, conv) = match self.dataset {
            DatasetKind::Mnist => {
                let sizes = [self.z_dim, 256, 512, 1024, channels * height * width];
                let layers = sizes
                    .windows(2)
                    .map(|w| LinearConfig::new(w[0], w[1]).init(device))
                    .collect();
                (Some(MlpGenerator { layers }), None)
            }
            DatasetKind::Cifar10 => {
                // z (1x1) -> 4x4 -> 8x8 -> 16x16 -> 32x32.
                let widths = [self.z_dim, self.ngf * 4, self.ngf * 2, self.ngf, channels];
                let deconvs = widths
                    .windows(2)
                    .enumerate()
                    .map(|(i, w)| {
                        let config =
                            ConvTranspose2dConfig::new([w[0], w[1]], [4, 4]).with_bias(false);
                        let config = if i == 0 {
                            config
                        } else {
                            config.with_stride([2, 2]).with_padding([1, 1])
                        };
                        config.init(device)
                    })
                    .collect();
                let norms = widths[1..widths.len() - 1]
                    .iter()
                    .map(|&w| BatchNormConfig::new(w).init(device))
                    .collect();
                (None, Some(ConvGenerator { deconvs, norms }))
            }
        };

        Generator {
            mlp,
            conv,
            z_dim: self.z_dim,
            channels,
            height,
            width,
        }
    }
}

#[derive(Module, Debug)]
pub struct MlpGenerator<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> MlpGenerator<B> {
    fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        let mut x = z;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            x = if i == last {
                x.tanh()
            } else {
                activation::leaky_relu(x, 0.2)
            };
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct ConvGenerator<B: Backend> {
    deconvs: Vec<ConvTranspose2d<B>>,
    norms: Vec<BatchNorm<B>>,
}

/// Normalize with the statistics of the batch itself, leaving the running statistics untouched.
fn batch_norm_no_update<B: Backend>(norm: &BatchNorm<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    let shape = [1, c, 1, 1];

    let flat = x.clone().swap_dims(0, 1).reshape([c, n * h * w]);
    let mean = flat.clone().mean_dim(1);
    let var = flat.sub(mean.clone()).powi_scalar(2).mean_dim(1);
    let std = var.add_scalar(norm.epsilon).sqrt().reshape(shape);

    x.sub(mean.reshape(shape))
        .div(std)
        .mul(norm.gamma.val().reshape(shape))
        .add(norm.beta.val().reshape(shape))
}

impl<B: Backend> ConvGenerator<B> {
    fn forward(&self, z: Tensor<B, 4>, update_stats: bool) -> Tensor<B, 4> {
        let mut x = z;
        for (i, deconv) in self.deconvs.iter().enumerate() {
            x = deconv.forward(x);
            x = match self.norms.get(i) {
                Some(norm) if update_stats || !B::ad_enabled() => {
                    activation::relu(norm.forward(x))
                }
                Some(norm) => activation::relu(batch_norm_no_update(norm, x)),
                None => x.tanh(),
            };
        }
        x
    }
}

/// Maps latent noise to images in [-1, 1], NCHW.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    mlp: Option<MlpGenerator<B>>,
    conv: Option<ConvGenerator<B>>,
    z_dim: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl<B: Backend> Generator<B> {
    pub fn z_dim(&self) -> usize {
        self.z_dim
    }

    pub fn image_dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Standard normal latent noise for `n` samples.
    pub fn noise(&self, n: usize, device: &Device<B>) -> Tensor<B, 2> {
        Tensor::random([n, self.z_dim], Distribution::Normal(0.0, 1.0), device)
    }

    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 4> {
        self.forward_impl(z, true)
    }

    /// Training forward pass that does not move the batch norm running statistics.
    ///
    /// Used for the extra passes that only measure per discriminator gradients, so that
    /// one training step moves the statistics once whatever the aggregation mode.
    pub fn forward_keep_stats(&self, z: Tensor<B, 2>) -> Tensor<B, 4> {
        self.forward_impl(z, false)
    }

    fn forward_impl(&self, z: Tensor<B, 2>, update_stats: bool) -> Tensor<B, 4> {
        let [n, _] = z.dims();
        let shape = [n, self.channels, self.height, self.width];

        if let Some(mlp) = &self.mlp {
            mlp.forward(z).reshape(shape)
        } else if let Some(conv) = &self.conv {
            conv.forward(z.reshape([n, self.z_dim, 1, 1]), update_stats)
        } else {
            unreachable!("Generator has no body")
        }
    }

    /// Current batch norm running means, one vector per normalization layer.
    pub fn running_means(&self) -> Vec<Vec<f32>> {
        self.conv
            .iter()
            .flat_map(|conv| &conv.norms)
            .map(|norm| {
                norm.running_mean
                    .value_sync()
                    .into_data()
                    .to_vec::<f32>()
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Generate `n` fresh samples.
    pub fn sample(&self, n: usize, device: &Device<B>) -> Tensor<B, 4> {
        self.forward(self.noise(n, device))
    }
}
