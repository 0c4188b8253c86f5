use burn::prelude::*;

use super::conv_bn::{ConvBn, ConvBnConfig};

/// MobileNetV2 bottleneck: 1x1 expansion, 3x3 depthwise, then a linear 1x1
/// projection. The input is added back when shapes match.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
    residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.depthwise.forward(x);
        let x = self.project.forward(x);

        if self.residual {
            input + x
        } else {
            x
        }
    }
}

#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub channels: [usize; 2],
    pub stride: usize,
    pub expand_ratio: usize,
}

impl InvertedResidualConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> InvertedResidual<B> {
        let [input, output] = self.channels;
        let hidden = input * self.expand_ratio;

        let expand = (self.expand_ratio > 1)
            .then(|| ConvBnConfig::new([input, hidden], 1).init(device));

        InvertedResidual {
            expand,
            depthwise: ConvBnConfig::new([hidden, hidden], 3)
                .with_stride(self.stride)
                .with_groups(hidden)
                .init(device),
            project: ConvBnConfig::new([hidden, output], 1)
                .with_activated(false)
                .init(device),
            residual: self.stride == 1 && input == output,
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn residual_only_when_shape_is_kept() {
        let device = NdArrayDevice::Cpu;

        let kept = InvertedResidualConfig::new([16, 16], 1, 6).init::<TestBackend>(&device);
        let strided = InvertedResidualConfig::new([16, 16], 2, 6).init::<TestBackend>(&device);
        let widened = InvertedResidualConfig::new([16, 24], 1, 6).init::<TestBackend>(&device);

        assert!(kept.residual);
        assert!(!strided.residual);
        assert!(!widened.residual);
    }

    #[test]
    fn no_expansion_for_ratio_one() {
        let device = NdArrayDevice::Cpu;
        let block = InvertedResidualConfig::new([8, 16], 2, 1).init::<TestBackend>(&device);

        let output = block.forward(Tensor::zeros([1, 8, 10, 10], &device));

        assert!(block.expand.is_none());
        assert_eq!(output.dims(), [1, 16, 5, 5]);
    }
}
