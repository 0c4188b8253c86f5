use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

pub fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x).clamp_max(6)
}

/// Convolution, batch norm and an optional ReLU6. Padding keeps the spatial
/// size for stride 1.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activated: bool,
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);

        if self.activated {
            relu6(x)
        } else {
            x
        }
    }
}

#[derive(Config, Debug)]
pub struct ConvBnConfig {
    channels: [usize; 2],

    kernel_size: usize,

    #[config(default = 1)]
    stride: usize,

    #[config(default = 1)]
    groups: usize,

    #[config(default = true)]
    activated: bool,
}

impl ConvBnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBn<B> {
        let padding = (self.kernel_size - 1) / 2;

        ConvBn {
            conv: Conv2dConfig::new(self.channels, [self.kernel_size, self.kernel_size])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_groups(self.groups)
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(self.channels[1]).init(device),
            activated: self.activated,
        }
    }
}
