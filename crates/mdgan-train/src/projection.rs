use burn::{
    module::{Module, Param},
    prelude::Backend,
    tensor::{Device, Distribution, Tensor, module::conv2d, ops::ConvOptions},
};

/// A frozen random linear map applied to flattened inputs.
#[derive(Module, Debug)]
pub struct LinearProjection<B: Backend> {
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> LinearProjection<B> {
    pub fn new(in_dim: usize, out_dim: usize, device: &Device<B>) -> Self {
        // Gaussian entries with variance 1/out_dim roughly preserve norms.
        let std = (1.0 / out_dim as f64).sqrt();
        let weight = Tensor::random([in_dim, out_dim], Distribution::Normal(0.0, std), device);
        Self {
            weight: Param::from_tensor(weight).set_require_grad(false),
        }
    }

    pub fn out_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        input.matmul(self.weight.val())
    }
}

/// A frozen random strided convolution, halving the spatial resolution.
#[derive(Module, Debug)]
pub struct ConvProjection<B: Backend> {
    weight: Param<Tensor<B, 4>>,
}

const PROJ_KERNEL: usize = 4;

impl<B: Backend> ConvProjection<B> {
    pub fn new(channels: usize, device: &Device<B>) -> Self {
        let weight = Tensor::<B, 4>::random(
            [channels, channels, PROJ_KERNEL, PROJ_KERNEL],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        // Unit norm filters.
        let norms = weight
            .clone()
            .powi_scalar(2)
            .sum_dim(3)
            .sum_dim(2)
            .sum_dim(1)
            .sqrt()
            .clamp_min(1e-6);
        let weight = weight / norms;

        Self {
            weight: Param::from_tensor(weight).set_require_grad(false),
        }
    }

    /// Spatial size of the output for an input of size `size`.
    pub fn out_size(size: usize) -> usize {
        (size + 2 - PROJ_KERNEL) / 2 + 1
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        conv2d(
            input,
            self.weight.val(),
            None,
            ConvOptions::new([2, 2], [1, 1], [1, 1], 1),
        )
    }
}
