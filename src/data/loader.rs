use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{imageops::FilterType, DynamicImage, ImageReader, RgbImage};
use rayon::prelude::*;
use tracing::{info, warn};

use super::{ImageItem, CHANNEL_COUNT};
use crate::error::{Error, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Reads a class-per-directory image tree into memory, resizing every image
/// to a fixed size.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    height: usize,
    width: usize,
    chunk_size: usize,
}

impl ImageLoader {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn load(&self, data_dir: &Path, classes: &[String]) -> Result<Vec<ImageItem>> {
        let class_files = classes
            .iter()
            .map(|class| list_files(&data_dir.join(class)))
            .collect::<Result<Vec<_>>>()?;

        let total: usize = class_files.iter().map(Vec::len).sum();
        let mut items = Vec::with_capacity(total);
        let mut processed = 0;

        for (label, (class, files)) in classes.iter().zip(&class_files).enumerate() {
            info!(class = %class, files = files.len(), "Processing class");

            for chunk in files.chunks(self.chunk_size) {
                let decoded: Vec<ImageItem> = chunk
                    .par_iter()
                    .filter_map(|path| match self.decode(path) {
                        Ok(pixels) => Some(ImageItem {
                            pixels,
                            height: self.height,
                            width: self.width,
                            label,
                        }),
                        Err(err) => {
                            warn!(path = %path.display(), %err, "Skipping unreadable image");
                            None
                        }
                    })
                    .collect();

                processed += chunk.len();
                items.extend(decoded);

                info!("Progress: {processed}/{total} images processed");
            }
        }

        if items.is_empty() {
            return Err(Error::dataset(format!(
                "no readable images in {}",
                data_dir.display()
            )));
        }

        Ok(items)
    }

    pub fn decode(&self, path: &Path) -> Result<Vec<u8>> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.preprocess(&image))
    }

    pub fn preprocess(&self, image: &DynamicImage) -> Vec<u8> {
        let image = image
            .resize_exact(self.width as u32, self.height as u32, FilterType::Triangle)
            .to_rgb8();

        to_channels_first(&image)
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Interleaved HWC RGB into planar CHW.
pub fn to_channels_first(image: &RgbImage) -> Vec<u8> {
    let width = image.width() as usize;
    let plane = width * image.height() as usize;
    let mut pixels = vec![0; CHANNEL_COUNT * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for (channel, value) in pixel.0.into_iter().enumerate() {
            pixels[channel * plane + offset] = value;
        }
    }

    pixels
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    use super::*;

    fn write_png(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(6, 4, Rgb(color)).save(path).unwrap();
    }

    #[test]
    fn channels_are_planar() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([1, 2, 3]));
        image.put_pixel(1, 0, Rgb([4, 5, 6]));

        assert_eq!(to_channels_first(&image), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn loads_resizes_and_labels_each_class() {
        let tmp = TempDir::new().unwrap();
        let classes = vec!["glass".to_string(), "paper".to_string()];
        for class in &classes {
            fs::create_dir(tmp.path().join(class)).unwrap();
        }
        write_png(&tmp.path().join("glass/a.png"), [10, 20, 30]);
        write_png(&tmp.path().join("paper/a.png"), [200, 200, 200]);
        write_png(&tmp.path().join("paper/b.png"), [100, 0, 0]);

        let items = ImageLoader::new(8, 8)
            .with_chunk_size(1)
            .load(tmp.path(), &classes)
            .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items.iter().filter(|item| item.label == 1).count(), 2);
        assert!(items.iter().all(|item| item.pixels.len() == CHANNEL_COUNT * 8 * 8));

        let glass = items.iter().find(|item| item.label == 0).unwrap();
        assert_eq!(glass.pixels[0], 10);
        assert_eq!(glass.pixels[64], 20);
        assert_eq!(glass.pixels[128], 30);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let classes = vec!["metal".to_string()];
        fs::create_dir(tmp.path().join("metal")).unwrap();
        write_png(&tmp.path().join("metal/can.png"), [1, 2, 3]);
        fs::write(tmp.path().join("metal/notes.txt"), "not an image").unwrap();

        let items = ImageLoader::new(4, 4).load(tmp.path(), &classes).unwrap();

        assert_eq!(items.len(), 1);
    }

    #[test]
    fn nothing_readable_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let classes = vec!["empty".to_string()];
        fs::create_dir(tmp.path().join("empty")).unwrap();

        let err = ImageLoader::new(4, 4).load(tmp.path(), &classes).unwrap_err();

        assert!(matches!(err, Error::Dataset(_)));
    }
}
