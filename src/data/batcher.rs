use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::{ImageItem, CHANNEL_COUNT};

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    height: usize,
    width: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, height: usize, width: usize) -> Self {
        Self {
            device,
            height,
            width,
        }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.pixels.iter().map(|&value| value as f32))
            .collect();
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, CHANNEL_COUNT, self.height, self.width])
                .convert::<B::FloatElem>(),
            &self.device,
        ) / 255.;

        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]).convert::<B::IntElem>(),
            &self.device,
        );

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn batch_is_normalized_and_shaped() {
        let items = vec![
            ImageItem {
                pixels: vec![255; CHANNEL_COUNT * 2 * 2],
                height: 2,
                width: 2,
                label: 1,
            },
            ImageItem {
                pixels: vec![0; CHANNEL_COUNT * 2 * 2],
                height: 2,
                width: 2,
                label: 0,
            },
        ];

        let batch = ImageBatcher::<TestBackend>::new(NdArrayDevice::Cpu, 2, 2).batch(items);

        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(values[..12].iter().all(|&value| value == 1.0));
        assert!(values[12..].iter().all(|&value| value == 0.0));

        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }
}
