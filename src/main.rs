use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    config::Config,
    optim::AdamConfig,
    prelude::Backend,
    tensor::backend::AutodiffBackend,
};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use waste_classifier::{
    backend::ComputeBackend,
    inference::Classifier,
    preflight::Preflight,
    training::{train, TrainingConfig},
};

/// Train and run a waste image classifier.
#[derive(Parser, Debug)]
#[command(name = "waste-classifier", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that everything training needs is in place
    Check {
        /// Dataset zip archive or directory with one subdirectory per class
        data: PathBuf,

        #[arg(long, default_value = "artifact")]
        artifact_dir: PathBuf,

        #[arg(long, value_enum, default_value_t)]
        backend: ComputeBackend,
    },
    /// Train a model and save it to the artifact directory
    Train(TrainArgs),
    /// Classify images with a trained model
    Classify {
        /// Images to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[arg(long, default_value = "artifact")]
        artifact_dir: PathBuf,

        #[arg(long, value_enum, default_value_t)]
        backend: ComputeBackend,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Dataset zip archive or directory with one subdirectory per class
    data: PathBuf,

    #[arg(long, default_value = "artifact")]
    artifact_dir: PathBuf,

    /// Training configuration JSON; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    backend: ComputeBackend,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Square input size in pixels
    #[arg(long)]
    image_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainArgs {
    fn training_config(&self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|err| anyhow::anyhow!("{err:?}"))
                .with_context(|| format!("loading {}", path.display()))?,
            None => TrainingConfig::new(AdamConfig::new()),
        };

        if let Some(epochs) = self.epochs {
            config.epoch_count = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(image_size) = self.image_size {
            config.image_height = image_size;
            config.image_width = image_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

fn run_train<B: AutodiffBackend>(
    args: &TrainArgs,
    config: TrainingConfig,
    device: B::Device,
) -> anyhow::Result<()> {
    let summary = train::<B>(&args.data, &args.artifact_dir, config, device)?;

    println!(
        "Trained on {} images, validated on {} ({} classes)",
        summary.train_count,
        summary.valid_count,
        summary.class_names.len()
    );
    println!("Validation accuracy: {:.2}%", summary.evaluation.accuracy * 100.);

    Ok(())
}

fn run_classify<B: Backend>(
    images: &[PathBuf],
    artifact_dir: &Path,
    device: B::Device,
) -> anyhow::Result<()> {
    let classifier = Classifier::<B>::load(artifact_dir, device)?;

    for image in images {
        let prediction = classifier
            .classify(image)
            .with_context(|| format!("classifying {}", image.display()))?;

        println!(
            "{}: {} ({:.1}%)",
            image.display(),
            prediction.label,
            prediction.confidence * 100.
        );
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Check {
            data,
            artifact_dir,
            backend,
        } => {
            let extract_dir = TrainingConfig::new(AdamConfig::new()).extract_dir;
            let report = Preflight::for_training(&data, &artifact_dir, backend)
                .with_extract_dir(Path::new(&extract_dir))
                .run();
            print!("{report}");
            report.ensure()?;
        }
        Command::Train(args) => {
            let config = args.training_config()?;
            Preflight::for_training(&args.data, &args.artifact_dir, args.backend)
                .with_extract_dir(Path::new(&config.extract_dir))
                .run()
                .ensure()?;

            info!(backend = %args.backend, "Starting training");
            match args.backend {
                ComputeBackend::Wgpu => {
                    run_train::<Autodiff<Wgpu<f32, i32>>>(&args, config, WgpuDevice::default())?
                }
                ComputeBackend::Ndarray => {
                    run_train::<Autodiff<NdArray<f32>>>(&args, config, NdArrayDevice::Cpu)?
                }
            }
        }
        Command::Classify {
            images,
            artifact_dir,
            backend,
        } => {
            Preflight::for_inference(&artifact_dir, backend)
                .run()
                .ensure()?;

            match backend {
                ComputeBackend::Wgpu => run_classify::<Wgpu<f32, i32>>(
                    &images,
                    &artifact_dir,
                    WgpuDevice::default(),
                )?,
                ComputeBackend::Ndarray => {
                    run_classify::<NdArray<f32>>(&images, &artifact_dir, NdArrayDevice::Cpu)?
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn train_args(args: &[&str]) -> TrainArgs {
        let cli = Cli::try_parse_from(["waste-classifier", "train", "data"].iter().chain(args))
            .unwrap();
        match cli.command {
            Command::Train(args) => args,
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn flags_override_the_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("training.json");
        TrainingConfig::new(AdamConfig::new())
            .with_epoch_count(30)
            .with_batch_size(16)
            .with_seed(1)
            .save(&path)
            .unwrap();

        let config = train_args(&[
            "--config",
            path.to_str().unwrap(),
            "--epochs",
            "3",
            "--image-size",
            "96",
        ])
        .training_config()
        .unwrap();

        assert_eq!(config.epoch_count, 3);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.seed, 1);
        assert_eq!(config.image_height, 96);
        assert_eq!(config.image_width, 96);
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        let config = train_args(&["--learning-rate", "0.001"]).training_config().unwrap();

        assert_eq!(config.epoch_count, 10);
        assert_eq!(config.learning_rate, 0.001);
    }

    #[test]
    fn zero_batch_size_and_epochs_are_rejected() {
        assert!(train_args(&["--batch-size", "0"]).training_config().is_err());
        assert!(train_args(&["--epochs", "0"]).training_config().is_err());
    }

    #[test]
    fn unreadable_config_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.json");

        assert!(train_args(&["--config", path.to_str().unwrap()])
            .training_config()
            .is_err());
    }
}
