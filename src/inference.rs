use std::path::Path;

use burn::{
    config::Config,
    data::dataloader::batcher::Batcher,
    module::Module,
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    artifact::{ArtifactManifest, CONFIG_FILE, MODEL_FILE},
    data::{ImageBatcher, ImageItem, ImageLoader},
    error::{Error, Result},
    model::WasteNet,
    training::TrainingConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    /// Every class with its probability, most likely first.
    pub ranking: Vec<(String, f32)>,
}

impl Prediction {
    pub fn from_probabilities(class_names: &[String], probabilities: &[f32]) -> Result<Self> {
        let mut ranking: Vec<(String, f32)> = class_names
            .iter()
            .cloned()
            .zip(probabilities.iter().copied())
            .collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (label, confidence) = ranking
            .first()
            .cloned()
            .ok_or_else(|| Error::artifact("model has no classes"))?;

        Ok(Self {
            label,
            confidence,
            ranking,
        })
    }
}

/// A trained model loaded back from its artifact directory.
pub struct Classifier<B: Backend> {
    model: WasteNet<B>,
    manifest: ArtifactManifest,
    loader: ImageLoader,
    batcher: ImageBatcher<B>,
}

impl<B: Backend> Classifier<B> {
    pub fn load(artifact_dir: &Path, device: B::Device) -> Result<Self> {
        let config = TrainingConfig::load(artifact_dir.join(CONFIG_FILE))
            .map_err(|err| Error::Config(format!("{err:?}")))?;
        let manifest = ArtifactManifest::load(artifact_dir)?;

        if !manifest.is_current_version() {
            warn!(
                "Model was trained with version {}, but version {} is running",
                manifest.crate_version,
                env!("CARGO_PKG_VERSION")
            );
        }

        let record = CompactRecorder::new()
            .load(artifact_dir.join(MODEL_FILE), &device)
            .map_err(|err| Error::artifact(format!("loading model: {err:?}")))?;

        let model = config
            .model
            .init::<B>(manifest.class_names.len(), &device)
            .load_record(record);

        debug!(classes = ?manifest.class_names, "Loaded classifier");

        Ok(Self {
            model,
            loader: ImageLoader::new(manifest.image_height, manifest.image_width),
            batcher: ImageBatcher::new(device, manifest.image_height, manifest.image_width),
            manifest,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.manifest.class_names
    }

    pub fn classify(&self, path: &Path) -> Result<Prediction> {
        let item = ImageItem {
            pixels: self.loader.decode(path)?,
            height: self.manifest.image_height,
            width: self.manifest.image_width,
            label: 0,
        };

        let batch = self.batcher.batch(vec![item]);
        let probabilities = self
            .model
            .probabilities(batch.images)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| Error::Tensor(format!("{err:?}")))?;

        Prediction::from_probabilities(self.class_names(), &probabilities)
    }
}
