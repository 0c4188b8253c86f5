use burn::{
    nn::{
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::{
    data::{ImageBatch, CHANNEL_COUNT},
    module::{
        conv_bn::{ConvBn, ConvBnConfig},
        inverted_residual::{InvertedResidual, InvertedResidualConfig},
    },
};

const STEM_CHANNELS: usize = 32;
const HEAD_CHANNELS: usize = 1280;
const CHANNEL_DIVISOR: usize = 8;

// t = expansion factor, c = output channels, n = repeats, s = first stride
const BOTTLENECKS: [[usize; 4]; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];

/// Rounds `value` to the nearest multiple of `divisor`, never dropping more
/// than 10% below it.
fn make_divisible(value: f64, divisor: usize) -> usize {
    let divisor = divisor as f64;
    let rounded = (((value + divisor / 2.) / divisor).floor() * divisor).max(divisor);

    if rounded < 0.9 * value {
        (rounded + divisor) as usize
    } else {
        rounded as usize
    }
}

#[derive(Module, Debug)]
struct Classifier<B: Backend> {
    dropout: Dropout,
    linear: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dropout.forward(x);
        self.linear.forward(x)
    }
}

/// MobileNetV2 image classifier.
#[derive(Module, Debug)]
pub struct WasteNet<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBn<B>,
    avg_pool: AdaptiveAvgPool2d,
    classifier: Classifier<B>,
}

impl<B: Backend> WasteNet<B> {
    /// `[N, 3, H, W]` images in `[0, 1]` to `[N, classes]` logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem.forward(images);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.head.forward(x);

        let x = self.avg_pool.forward(x);
        let x = x.flatten(1, 3);
        self.classifier.forward(x)
    }

    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);

        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for WasteNet<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for WasteNet<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 0.2)]
    pub dropout: f64,

    /// Scales every layer's channel count. `1.0` is the standard network.
    #[config(default = 1.0)]
    pub width_multiplier: f64,
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, classes: usize, device: &B::Device) -> WasteNet<B> {
        let width = |channels: usize| {
            make_divisible(channels as f64 * self.width_multiplier, CHANNEL_DIVISOR)
        };

        let mut input = width(STEM_CHANNELS);
        let head = make_divisible(
            HEAD_CHANNELS as f64 * self.width_multiplier.max(1.),
            CHANNEL_DIVISOR,
        );

        let stem = ConvBnConfig::new([CHANNEL_COUNT, input], 3)
            .with_stride(2)
            .init(device);

        let mut blocks = Vec::new();
        for [t, c, n, s] in BOTTLENECKS {
            let output = width(c);

            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(InvertedResidualConfig::new([input, output], stride, t).init(device));
                input = output;
            }
        }

        WasteNet {
            stem,
            blocks,
            head: ConvBnConfig::new([input, head], 1).init(device),
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: Classifier {
                dropout: DropoutConfig::new(self.dropout).init(),
                linear: LinearConfig::new(head, classes).init(device),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn channels_round_to_multiples_of_eight() {
        assert_eq!(make_divisible(32., 8), 32);
        assert_eq!(make_divisible(32. * 0.35, 8), 16);
        assert_eq!(make_divisible(24. * 0.5, 8), 16);
        assert_eq!(make_divisible(3., 8), 8);
        assert_eq!(make_divisible(1280. * 1.3, 8), 1664);
    }

    #[test]
    fn standard_network_has_seventeen_bottlenecks() {
        let model = ModelConfig::new().init::<TestBackend>(4, &NdArrayDevice::Cpu);

        assert_eq!(model.blocks.len(), 17);
    }

    #[test]
    fn logits_match_class_count() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new()
            .with_width_multiplier(0.35)
            .init::<TestBackend>(5, &device);

        let logits = model.forward(Tensor::zeros([2, 3, 32, 32], &device));

        assert_eq!(logits.dims(), [2, 5]);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new()
            .with_width_multiplier(0.35)
            .init::<TestBackend>(3, &device);

        let probabilities = model.probabilities(Tensor::ones([1, 3, 32, 32], &device));
        let values = probabilities.into_data().to_vec::<f32>().unwrap();

        assert!((values.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }
}
