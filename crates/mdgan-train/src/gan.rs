use burn::{module::Module, prelude::Backend, tensor::Device};
use mdgan_dataset::DatasetKind;

use crate::{
    config::{DiscMode, ModelConfig},
    discriminator::{Discriminator, distinct_configs, projected_config},
    generator::{Generator, GeneratorConfig},
};

/// A generator together with the discriminators it is trained against.
#[derive(Module, Debug)]
pub struct Gan<B: Backend> {
    pub generator: Generator<B>,
    pub discriminators: Vec<Discriminator<B>>,
}

impl<B: Backend> Gan<B> {
    pub fn num_discriminators(&self) -> usize {
        self.discriminators.len()
    }
}

pub fn create_generator<B: Backend>(
    config: &ModelConfig,
    dataset: DatasetKind,
    device: &Device<B>,
) -> Generator<B> {
    GeneratorConfig::new(dataset)
        .with_z_dim(config.z_dim)
        .with_ngf(config.ngf)
        .init(device)
}

/// Build a freshly initialised GAN for the given dataset.
pub fn create_gan<B: Backend>(
    config: &ModelConfig,
    dataset: DatasetKind,
    device: &Device<B>,
) -> Gan<B> {
    assert!(
        config.ndiscriminators > 0,
        "Need at least one discriminator"
    );

    let discriminators = match config.disc_mode {
        DiscMode::Rp => {
            // Same architecture, but every init draws a new projection.
            let disc_config = projected_config(dataset, config.ndf, config.proj_dim);
            (0..config.ndiscriminators)
                .map(|_| disc_config.init(device))
                .collect()
        }
        DiscMode::Md => {
            let catalogue = distinct_configs(dataset, config.ndf);
            (0..config.ndiscriminators)
                .map(|i| catalogue[i % catalogue.len()].init(device))
                .collect()
        }
    };

    log::info!(
        "Created GAN with {} {:?} discriminators for {}",
        config.ndiscriminators,
        config.disc_mode,
        dataset.name()
    );

    Gan {
        generator: create_generator(config, dataset, device),
        discriminators,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    fn small_config(disc_mode: DiscMode, n: usize) -> ModelConfig {
        ModelConfig {
            ndiscriminators: n,
            disc_mode,
            z_dim: 8,
            proj_dim: 16,
            ngf: 8,
            ndf: 8,
        }
    }

    #[test]
    fn random_projection_discriminators_see_different_inputs() {
        let device = Default::default();
        let gan = create_gan::<NdArray>(&small_config(DiscMode::Rp, 3), DatasetKind::Mnist, &device);
        assert_eq!(gan.num_discriminators(), 3);
        assert!(gan.discriminators.iter().all(|d| d.has_projection()));

        let images = Tensor::<NdArray, 4>::ones([2, 1, 28, 28], &device);
        let a = gan.discriminators[0].forward(images.clone()).into_data();
        let b = gan.discriminators[1].forward(images).into_data();
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_mode_cycles_through_catalogue() {
        let device = Default::default();
        let gan = create_gan::<NdArray>(&small_config(DiscMode::Md, 7), DatasetKind::Cifar10, &device);
        assert_eq!(gan.num_discriminators(), 7);
        assert!(gan.discriminators.iter().all(|d| !d.has_projection()));
        assert_eq!(gan.generator.z_dim(), 8);
    }
}
