use std::{fs, path::Path};

use burn::{
    config::Config,
    data::dataloader::DataLoaderBuilder,
    data::dataset::transform::MapperDataset,
    module::{AutodiffModule, Module},
    optim::AdamConfig,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LossMetric},
        LearnerBuilder,
    },
};
use tracing::info;

use crate::{
    artifact::{self, ArtifactManifest, CONFIG_FILE, EVALUATION_FILE, MODEL_FILE},
    data::{
        self, loader::DEFAULT_CHUNK_SIZE, source, AugmentationConfig, Augmenter, ImageBatcher,
        ImageDataset, ImageLoader,
    },
    error::{self, Error},
    evaluation::{evaluate, EvaluationReport},
    model::ModelConfig,
};

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,

    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,

    #[config(default = "AugmentationConfig::new()")]
    pub augmentation: AugmentationConfig,

    #[config(default = 10)]
    pub epoch_count: usize,

    #[config(default = 8)]
    pub batch_size: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1.0e-4)]
    pub learning_rate: f64,

    #[config(default = 4)]
    pub worker_count: usize,

    #[config(default = 224)]
    pub image_height: usize,

    #[config(default = 224)]
    pub image_width: usize,

    #[config(default = "DEFAULT_CHUNK_SIZE")]
    pub chunk_size: usize,

    #[config(default = 0.2)]
    pub validation_ratio: f64,

    /// Where zip datasets are unpacked.
    #[config(default = "String::from(\"dataset\")")]
    pub extract_dir: String,
}

impl TrainingConfig {
    /// Rejects values burn would accept but cannot train with.
    pub fn validate(&self) -> error::Result<()> {
        let positive = [
            ("epoch_count", self.epoch_count),
            ("batch_size", self.batch_size),
            ("image_height", self.image_height),
            ("image_width", self.image_width),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if !(0.0..1.0).contains(&self.validation_ratio) {
            return Err(Error::Config(format!(
                "validation_ratio must be in [0, 1), got {}",
                self.validation_ratio
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub class_names: Vec<String>,
    pub train_count: usize,
    pub valid_count: usize,
    pub evaluation: EvaluationReport,
}

fn check_inputs_outside(artifact_dir: &Path, inputs: &[&Path]) -> error::Result<()> {
    match inputs.iter().find(|input| artifact::overlaps(artifact_dir, input)) {
        Some(input) => Err(Error::Config(format!(
            "artifact directory {} overlaps {}, which would be deleted",
            artifact_dir.display(),
            input.display()
        ))),
        None => Ok(()),
    }
}

fn create_artifact_dir(artifact_dir: &Path) -> error::Result<()> {
    if artifact_dir.exists() {
        fs::remove_dir_all(artifact_dir)?;
    }
    fs::create_dir_all(artifact_dir)?;
    Ok(())
}

pub fn train<B: AutodiffBackend>(
    data_path: &Path,
    artifact_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> error::Result<TrainingSummary> {
    config.validate()?;
    check_inputs_outside(artifact_dir, &[data_path, Path::new(&config.extract_dir)])?;

    create_artifact_dir(artifact_dir)?;

    config.save(artifact_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    let data_dir = source::resolve(data_path, Path::new(&config.extract_dir))?;
    let class_names = source::discover_classes(&data_dir)?;
    info!("Found {} classes: {:?}", class_names.len(), class_names);

    let items = ImageLoader::new(config.image_height, config.image_width)
        .with_chunk_size(config.chunk_size)
        .load(&data_dir, &class_names)?;
    let (train_items, valid_items) = data::split(items, config.validation_ratio, config.seed);

    if valid_items.is_empty() {
        return Err(Error::dataset(
            "validation split is empty, add images or raise the validation ratio",
        ));
    }

    let train_count = train_items.len();
    let valid_count = valid_items.len();
    info!(train = train_count, valid = valid_count, "Split dataset");

    let batcher_train =
        ImageBatcher::<B>::new(device.clone(), config.image_height, config.image_width);
    let batcher_valid = ImageBatcher::<B::InnerBackend>::new(
        device.clone(),
        config.image_height,
        config.image_width,
    );

    let dataset_train = MapperDataset::new(
        ImageDataset::new(train_items),
        Augmenter::new(config.augmentation.clone(), config.seed),
    );

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.worker_count)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.worker_count)
        .build(ImageDataset::new(valid_items));

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_application_logger(None)
        .devices(vec![device.clone()])
        .num_epochs(config.epoch_count)
        .summary()
        .build(
            config.model.init::<B>(class_names.len(), &device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let model_trained = learner.fit(dataloader_train, dataloader_valid.clone());

    let matrix = evaluate(&model_trained.valid(), dataloader_valid, class_names.len())?;
    let evaluation = matrix.report(&class_names);
    evaluation.save(&artifact_dir.join(EVALUATION_FILE))?;
    info!(
        accuracy = evaluation.accuracy,
        samples = evaluation.samples,
        "Evaluated on validation split"
    );

    model_trained
        .save_file(artifact_dir.join(MODEL_FILE), &CompactRecorder::new())
        .map_err(|err| Error::artifact(format!("saving model: {err:?}")))?;

    ArtifactManifest::new(class_names.clone(), config.image_height, config.image_width)
        .save(artifact_dir)?;

    info!(artifact_dir = %artifact_dir.display(), "Saved trained model");

    Ok(TrainingSummary {
        class_names,
        train_count,
        valid_count,
        evaluation,
    })
}
