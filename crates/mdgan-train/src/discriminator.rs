use burn::{
    config::Config,
    module::Module,
    nn::{
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::Backend,
    tensor::{Device, Tensor, activation},
};
use mdgan_dataset::DatasetKind;

use crate::projection::{ConvProjection, LinearProjection};

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub dataset: DatasetKind,
    /// Hidden layer sizes for the MLP body, channel widths for the conv body.
    pub widths: Vec<usize>,
    /// Kernel size of the conv body.
    #[config(default = 4)]
    pub kernel: usize,
    /// Look at the input through a frozen random projection.
    #[config(default = false)]
    pub projection: bool,
    /// Output size of the projection of flat inputs.
    #[config(default = 256)]
    pub proj_dim: usize,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Discriminator<B> {
        let [channels, height, width] = self.dataset.dims();

        match self.dataset {
            DatasetKind::Mnist => {
                let in_dim = channels * height * width;
                let projection = self
                    .projection
                    .then(|| LinearProjection::new(in_dim, self.proj_dim, device));
                let first = projection.as_ref().map_or(in_dim, |p| p.out_dim());

                let sizes: Vec<usize> = std::iter::once(first)
                    .chain(self.widths.iter().copied())
                    .chain(std::iter::once(1))
                    .collect();
                let layers = sizes
                    .windows(2)
                    .map(|w| LinearConfig::new(w[0], w[1]).init(device))
                    .collect();

                Discriminator {
                    mlp: Some(MlpBody {
                        projection,
                        layers,
                        dropout: DropoutConfig::new(self.dropout).init(),
                    }),
                    conv: None,
                }
            }
            DatasetKind::Cifar10 => {
                let projection = self
                    .projection
                    .then(|| ConvProjection::new(channels, device));
                let mut size = if projection.is_some() {
                    ConvProjection::<B>::out_size(height)
                } else {
                    height
                };

                let pad = (self.kernel - 1) / 2;
                let mut in_channels = channels;
                let mut convs = vec![];
                for &out_channels in &self.widths {
                    convs.push(
                        Conv2dConfig::new([in_channels, out_channels], [self.kernel, self.kernel])
                            .with_stride([2, 2])
                            .with_padding(PaddingConfig2d::Explicit(pad, pad))
                            .init(device),
                    );
                    size = (size + 2 * pad - self.kernel) / 2 + 1;
                    in_channels = out_channels;
                }
                debug_assert!(size > 0, "Discriminator downsamples too far");

                Discriminator {
                    mlp: None,
                    conv: Some(ConvBody {
                        projection,
                        convs,
                        head: LinearConfig::new(in_channels * size * size, 1).init(device),
                    }),
                }
            }
        }
    }
}

#[derive(Module, Debug)]
pub struct MlpBody<B: Backend> {
    projection: Option<LinearProjection<B>>,
    layers: Vec<Linear<B>>,
    dropout: Dropout,
}

impl<B: Backend> MlpBody<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images.flatten::<2>(1, 3);
        if let Some(projection) = &self.projection {
            x = projection.forward(x);
        }

        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i != last {
                x = self.dropout.forward(activation::leaky_relu(x, 0.2));
            }
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct ConvBody<B: Backend> {
    projection: Option<ConvProjection<B>>,
    convs: Vec<Conv2d<B>>,
    head: Linear<B>,
}

impl<B: Backend> ConvBody<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = match &self.projection {
            Some(projection) => projection.forward(images),
            None => images,
        };
        for conv in &self.convs {
            x = activation::leaky_relu(conv.forward(x), 0.2);
        }
        self.head.forward(x.flatten::<2>(1, 3))
    }
}

/// Scores images as real or fake. Outputs one logit per image.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    mlp: Option<MlpBody<B>>,
    conv: Option<ConvBody<B>>,
}

impl<B: Backend> Discriminator<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 1> {
        let [n, _, _, _] = images.dims();
        let logits = if let Some(mlp) = &self.mlp {
            mlp.forward(images)
        } else if let Some(conv) = &self.conv {
            conv.forward(images)
        } else {
            unreachable!("Discriminator has no body")
        };
        logits.reshape([n])
    }

    pub fn has_projection(&self) -> bool {
        self.mlp.as_ref().is_some_and(|m| m.projection.is_some())
            || self.conv.as_ref().is_some_and(|c| c.projection.is_some())
    }
}

/// The distinct architectures used when not relying on random projections.
pub fn distinct_configs(dataset: DatasetKind, ndf: usize) -> Vec<DiscriminatorConfig> {
    let half = (ndf / 2).max(1);
    match dataset {
        DatasetKind::Mnist => [
            vec![1024, 512, 256],
            vec![512, 256],
            vec![2048, 1024],
            vec![256, 256, 256],
            vec![1024],
        ]
        .into_iter()
        .map(|widths| DiscriminatorConfig::new(dataset, widths))
        .collect(),
        DatasetKind::Cifar10 => [
            (4, vec![ndf, ndf * 2, ndf * 4]),
            (3, vec![half, ndf, ndf * 2, ndf * 4]),
            (5, vec![ndf, ndf * 2]),
            (4, vec![half, ndf]),
            (3, vec![ndf * 2, ndf * 4, ndf * 8]),
        ]
        .into_iter()
        .map(|(kernel, widths)| DiscriminatorConfig::new(dataset, widths).with_kernel(kernel))
        .collect(),
    }
}

/// The shared architecture used behind random projections.
pub fn projected_config(dataset: DatasetKind, ndf: usize, proj_dim: usize) -> DiscriminatorConfig {
    let widths = match dataset {
        DatasetKind::Mnist => vec![1024, 512, 256],
        // Projected inputs are already at half resolution.
        DatasetKind::Cifar10 => vec![ndf, ndf * 2, ndf * 4],
    };
    DiscriminatorConfig::new(dataset, widths)
        .with_projection(true)
        .with_proj_dim(proj_dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn every_distinct_architecture_scores_each_image() {
        let device = Default::default();
        for dataset in [DatasetKind::Mnist, DatasetKind::Cifar10] {
            let [c, h, w] = dataset.dims();
            for config in distinct_configs(dataset, 8) {
                let disc = config.init::<NdArray>(&device);
                assert!(!disc.has_projection());
                let out = disc.forward(Tensor::zeros([3, c, h, w], &device));
                assert_eq!(out.dims(), [3]);
            }
        }
    }

    #[test]
    fn narrowest_catalogue_keeps_every_layer_non_empty() {
        let device = Default::default();
        for config in distinct_configs(DatasetKind::Cifar10, 1) {
            assert!(config.widths.iter().all(|&w| w > 0), "{:?}", config.widths);
            let disc = config.init::<NdArray>(&device);
            let out = disc.forward(Tensor::zeros([2, 3, 32, 32], &device));
            assert_eq!(out.dims(), [2]);
        }
    }

    #[test]
    fn projected_discriminators_score_each_image() {
        let device = Default::default();
        for dataset in [DatasetKind::Mnist, DatasetKind::Cifar10] {
            let [c, h, w] = dataset.dims();
            let disc = projected_config(dataset, 8, 32).init::<NdArray>(&device);
            assert!(disc.has_projection());
            let out = disc.forward(Tensor::ones([2, c, h, w], &device));
            assert_eq!(out.dims(), [2]);
        }
    }
}
