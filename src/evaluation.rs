use std::{fs::File, io::BufWriter, path::Path, sync::Arc};

use burn::{data::dataloader::DataLoader, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::ImageBatch,
    error::{Error, Result},
    model::WasteNet,
};

/// Counts indexed as `[target][predicted]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            counts: vec![vec![0; classes]; classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.counts.len()
    }

    pub fn record(&mut self, target: usize, predicted: usize) {
        let classes = self.classes();
        if target >= classes || predicted >= classes {
            debug!(target, predicted, classes, "Ignoring out of range label");
            return;
        }

        self.counts[target][predicted] += 1;
    }

    pub fn count(&self, target: usize, predicted: usize) -> usize {
        self.counts[target][predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.classes()).map(|class| self.counts[class][class]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.,
            total => self.correct() as f64 / total as f64,
        }
    }

    pub fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    /// `None` when the class was never predicted.
    pub fn precision(&self, class: usize) -> Option<f64> {
        let predicted: usize = self.counts.iter().map(|row| row[class]).sum();
        (predicted > 0).then(|| self.counts[class][class] as f64 / predicted as f64)
    }

    /// `None` when the class never occurred.
    pub fn recall(&self, class: usize) -> Option<f64> {
        let support = self.support(class);
        (support > 0).then(|| self.counts[class][class] as f64 / support as f64)
    }

    pub fn report(&self, class_names: &[String]) -> EvaluationReport {
        EvaluationReport {
            accuracy: self.accuracy(),
            samples: self.total(),
            classes: class_names
                .iter()
                .take(self.classes())
                .enumerate()
                .map(|(class, name)| ClassReport {
                    name: name.clone(),
                    precision: self.precision(class),
                    recall: self.recall(class),
                    support: self.support(class),
                })
                .collect(),
            confusion_matrix: self.counts.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub name: String,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub samples: usize,
    pub classes: Vec<ClassReport>,
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl EvaluationReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

pub fn evaluate<B: Backend>(
    model: &WasteNet<B>,
    dataloader: Arc<dyn DataLoader<ImageBatch<B>>>,
    classes: usize,
) -> Result<ConfusionMatrix> {
    let mut matrix = ConfusionMatrix::new(classes);

    for batch in dataloader.iter() {
        let predicted = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);

        let predicted = int_values(predicted)?;
        let targets = int_values(batch.targets)?;

        for (target, predicted) in targets.into_iter().zip(predicted) {
            matrix.record(target, predicted);
        }
    }

    Ok(matrix)
}

fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| Error::Tensor(format!("{err:?}")))?;

    Ok(values.into_iter().map(|value| value as usize).collect())
}

#[cfg(test)]
mod tests {
    use burn::{
        backend::{ndarray::NdArrayDevice, NdArray},
        data::dataloader::DataLoaderBuilder,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        data::{ImageBatcher, ImageDataset, ImageItem, CHANNEL_COUNT},
        model::ModelConfig,
    };

    type TestBackend = NdArray<f32>;

    fn matrix() -> ConfusionMatrix {
        let mut matrix = ConfusionMatrix::new(3);
        for (target, predicted) in [(0, 0), (0, 0), (0, 1), (1, 1), (1, 0), (2, 2)] {
            matrix.record(target, predicted);
        }
        matrix
    }

    #[test]
    fn accuracy_counts_the_diagonal() {
        let matrix = matrix();

        assert_eq!(matrix.total(), 6);
        assert_eq!(matrix.correct(), 4);
        assert!((matrix.accuracy() - 4. / 6.).abs() < 1e-12);
    }

    #[test]
    fn precision_and_recall_per_class() {
        let matrix = matrix();

        assert_eq!(matrix.precision(0), Some(2. / 3.));
        assert_eq!(matrix.recall(0), Some(2. / 3.));
        assert_eq!(matrix.precision(1), Some(0.5));
        assert_eq!(matrix.recall(1), Some(0.5));
        assert_eq!(matrix.precision(2), Some(1.));
    }

    #[test]
    fn unseen_class_has_no_precision_or_recall() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(0, 0);

        assert_eq!(matrix.precision(1), None);
        assert_eq!(matrix.recall(1), None);
        assert_eq!(ConfusionMatrix::new(2).accuracy(), 0.);
    }

    #[test]
    fn out_of_range_labels_are_ignored() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(5, 0);
        matrix.record(0, 7);

        assert_eq!(matrix.total(), 0);
    }

    #[test]
    fn report_names_each_class() {
        let names = vec!["glass".to_string(), "metal".to_string(), "paper".to_string()];

        let report = matrix().report(&names);

        assert_eq!(report.samples, 6);
        assert_eq!(
            report.classes.iter().map(|class| class.support).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(report.classes[2].name, "paper");
        assert_eq!(report.confusion_matrix[0], vec![2, 1, 0]);
    }

    #[test]
    fn evaluate_sees_every_sample() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new()
            .with_width_multiplier(0.35)
            .init::<TestBackend>(2, &device);
        let items = (0..5)
            .map(|i| ImageItem {
                pixels: vec![i * 40; CHANNEL_COUNT * 16 * 16],
                height: 16,
                width: 16,
                label: (i % 2) as usize,
            })
            .collect();
        let dataloader = DataLoaderBuilder::new(ImageBatcher::<TestBackend>::new(device, 16, 16))
            .batch_size(2)
            .build(ImageDataset::new(items));

        let matrix = evaluate(&model, dataloader, 2).unwrap();

        assert_eq!(matrix.total(), 5);
        assert_eq!(matrix.support(0), 3);
        assert_eq!(matrix.support(1), 2);
    }
}
