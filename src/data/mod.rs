use std::collections::BTreeMap;

use burn::data::dataset::{Dataset, InMemDataset};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

pub mod augment;
pub mod batcher;
pub mod loader;
pub mod source;

pub use augment::{AugmentationConfig, Augmenter};
pub use batcher::{ImageBatch, ImageBatcher};
pub use loader::ImageLoader;

pub const CHANNEL_COUNT: usize = 3;

/// A decoded, resized image stored channel-first as raw RGB bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub pixels: Vec<u8>,
    pub height: usize,
    pub width: usize,
    pub label: usize,
}

pub struct ImageDataset {
    dataset: InMemDataset<ImageItem>,
}

impl ImageDataset {
    pub fn new(items: Vec<ImageItem>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

/// Splits items into `(train, valid)` per class so both halves keep the class
/// proportions. Every class keeps at least one training item.
pub fn split(
    items: Vec<ImageItem>,
    validation_ratio: f64,
    seed: u64,
) -> (Vec<ImageItem>, Vec<ImageItem>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let validation_ratio = validation_ratio.clamp(0.0, 1.0);

    let mut by_label: BTreeMap<usize, Vec<ImageItem>> = BTreeMap::new();
    for item in items {
        by_label.entry(item.label).or_default().push(item);
    }

    let mut train = Vec::new();
    let mut valid = Vec::new();

    for (_, mut group) in by_label {
        group.shuffle(&mut rng);

        let valid_count = (group.len() as f64 * validation_ratio).round() as usize;
        let valid_count = valid_count.min(group.len().saturating_sub(1));

        let rest = group.split_off(valid_count);
        valid.extend(group);
        train.extend(rest);
    }

    train.shuffle(&mut rng);
    valid.shuffle(&mut rng);

    (train, valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(label: usize, marker: u8) -> ImageItem {
        ImageItem {
            pixels: vec![marker; CHANNEL_COUNT],
            height: 1,
            width: 1,
            label,
        }
    }

    fn count(items: &[ImageItem], label: usize) -> usize {
        items.iter().filter(|item| item.label == label).count()
    }

    #[test]
    fn split_keeps_class_proportions() {
        let items = (0..10)
            .map(|i| item(0, i))
            .chain((0..20).map(|i| item(1, i)))
            .collect();

        let (train, valid) = split(items, 0.2, 42);

        assert_eq!(count(&valid, 0), 2);
        assert_eq!(count(&valid, 1), 4);
        assert_eq!(count(&train, 0), 8);
        assert_eq!(count(&train, 1), 16);
    }

    #[test]
    fn split_is_deterministic_for_a_seed() {
        let items: Vec<_> = (0..12).map(|i| item((i % 3) as usize, i)).collect();

        let first = split(items.clone(), 0.25, 7);
        let second = split(items, 0.25, 7);

        assert_eq!(first, second);
    }

    #[test]
    fn split_never_empties_a_class_from_training() {
        let items = vec![item(0, 1), item(1, 2), item(1, 3)];

        let (train, valid) = split(items, 0.9, 1);

        assert_eq!(count(&train, 0), 1);
        assert_eq!(count(&train, 1), 1);
        assert_eq!(valid.len(), 1);
    }
}
