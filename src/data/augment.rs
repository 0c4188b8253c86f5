use std::sync::{Mutex, PoisonError};

use burn::{config::Config, data::dataset::transform::Mapper};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{ImageItem, CHANNEL_COUNT};

#[derive(Config, Debug)]
pub struct AugmentationConfig {
    #[config(default = 0.5)]
    pub flip_probability: f64,

    /// Maximum relative brightness change, `0.1` scales pixels by `0.9..=1.1`.
    #[config(default = 0.1)]
    pub brightness: f32,
}

/// Random training-time augmentation, applied lazily per item.
///
/// Draws come from one seeded generator shared by all loader workers, so a
/// run is reproducible when items are requested in a fixed order, that is
/// with a single worker.
pub struct Augmenter {
    config: AugmentationConfig,
    rng: Mutex<StdRng>,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Mapper<ImageItem, ImageItem> for Augmenter {
    fn map(&self, item: &ImageItem) -> ImageItem {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut item = item.clone();

        if rng.gen_bool(self.config.flip_probability.clamp(0.0, 1.0)) {
            flip_horizontal(&mut item);
        }

        let brightness = self.config.brightness.abs();
        if brightness > 0. {
            let factor = rng.gen_range(1. - brightness..=1. + brightness);
            scale_brightness(&mut item.pixels, factor);
        }

        item
    }
}

pub fn flip_horizontal(item: &mut ImageItem) {
    let width = item.width;
    if width == 0 {
        return;
    }

    for row in item.pixels.chunks_exact_mut(width).take(CHANNEL_COUNT * item.height) {
        row.reverse();
    }
}

pub fn scale_brightness(pixels: &mut [u8], factor: f32) {
    for value in pixels {
        *value = (*value as f32 * factor).round().clamp(0., 255.) as u8;
    }
}
