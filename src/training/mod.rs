//! Offline transfer-learning trainer producing the model the service loads.

pub mod augment;
pub mod callbacks;
pub mod dataset;
pub mod graph;

use std::fs;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::IMAGE_SIZE;

use self::augment::{AugmentConfig, Augmenter};
use self::callbacks::{BestCheckpoint, EarlyStopping, EpochMetrics, History, ReduceLrOnPlateau};
use self::dataset::{load_batch, write_class_list, ImageSample, LabeledDirectory};
use self::graph::{HeadConfig, StepOutput, TransferGraph};

pub const CLASS_LIST_FILE: &str = "class_list.txt";
pub const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub dataset_dir: PathBuf,
    /// Frozen GraphDef of the feature extractor.
    pub base_model: PathBuf,
    pub base_input: String,
    pub base_output: String,
    pub feature_dim: u64,
    /// SavedModel directory written on every validation-accuracy improvement.
    pub output_dir: PathBuf,
    pub image_size: u32,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub validation_split: f32,
    pub hidden_units: u64,
    pub dropout: f32,
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub early_stopping_patience: usize,
    pub seed: u64,
    pub augment: AugmentConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("data/tomato"),
            base_model: PathBuf::from("models/mobilenet_v2_features.pb"),
            base_input: "x".to_string(),
            base_output: "Identity".to_string(),
            feature_dim: 1280,
            output_dir: PathBuf::from("models/tomato_disease_model"),
            image_size: IMAGE_SIZE,
            batch_size: 32,
            epochs: 50,
            learning_rate: 0.001,
            validation_split: 0.2,
            hidden_units: 256,
            dropout: 0.3,
            lr_patience: 3,
            lr_factor: 0.5,
            early_stopping_patience: 5,
            seed: 42,
            augment: AugmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub classes: Vec<String>,
    pub epochs_run: usize,
    pub best_val_accuracy: f64,
    pub history: History,
    pub output_dir: PathBuf,
}

#[derive(Default)]
struct Totals {
    loss: f64,
    correct: usize,
    seen: usize,
}

impl Totals {
    fn add(&mut self, step: StepOutput, batch_len: usize) {
        self.loss += step.loss as f64 * batch_len as f64;
        self.correct += step.correct;
        self.seen += batch_len;
    }

    fn mean_loss(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss / self.seen as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }
}

fn progress_bar(len: u64, epoch: usize, epochs: usize) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix} [{bar:40.green/white}] {pos}/{len} batches {msg}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_prefix(format!("Epoch {}/{}", epoch, epochs));
    bar
}

pub fn train(config: &TrainingConfig) -> Result<TrainingReport> {
    if config.batch_size == 0 {
        return Err(Error::Config("batch size must be positive".to_string()));
    }

    let dataset = LabeledDirectory::scan(&config.dataset_dir)?;
    let (mut training, validation) = dataset.split(config.validation_split);
    if training.is_empty() {
        return Err(Error::Dataset("no training images".to_string()));
    }
    if validation.is_empty() {
        return Err(Error::Dataset("no validation images".to_string()));
    }
    info!(
        "Training on {} images, validating on {} ({} classes)",
        training.len(),
        validation.len(),
        dataset.num_classes()
    );

    let base_graph = fs::read(&config.base_model)?;
    let num_classes = dataset.num_classes();
    let graph = TransferGraph::build(
        &base_graph,
        &config.base_input,
        &config.base_output,
        HeadConfig {
            feature_dim: config.feature_dim,
            hidden_units: config.hidden_units,
            num_classes: num_classes as u64,
            dropout: config.dropout,
            image_size: config.image_size,
        },
    )?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let augmenter = Augmenter::new(config.augment.clone());
    let mut early_stopping = EarlyStopping::new(config.early_stopping_patience);
    let mut plateau = ReduceLrOnPlateau::new(
        config.learning_rate,
        config.lr_factor,
        config.lr_patience,
    );
    let mut checkpoint = BestCheckpoint::default();
    let mut history = History::default();
    let mut epochs_run = 0;

    for epoch in 1..=config.epochs {
        epochs_run = epoch;
        let learning_rate = plateau.learning_rate();
        training.shuffle(&mut rng);

        let bar = progress_bar(
            training.chunks(config.batch_size).len() as u64,
            epoch,
            config.epochs,
        );
        let mut train_totals = Totals::default();
        for chunk in training.chunks(config.batch_size) {
            let batch = load_batch(chunk, num_classes, config.image_size, |img| {
                augmenter.apply(&img, &mut rng)
            })?;
            let step = graph.train_step(&batch, learning_rate as f32)?;
            train_totals.add(step, batch.len);
            bar.set_message(format!(
                "loss {:.4} acc {:.4}",
                train_totals.mean_loss(),
                train_totals.accuracy()
            ));
            bar.inc(1);
        }
        bar.finish_and_clear();

        let val_totals = evaluate(&graph, &validation, num_classes, config)?;
        let metrics = EpochMetrics {
            epoch,
            train_loss: train_totals.mean_loss(),
            train_accuracy: train_totals.accuracy(),
            val_loss: val_totals.mean_loss(),
            val_accuracy: val_totals.accuracy(),
            learning_rate,
        };
        info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} - lr: {:.2e}",
            epoch,
            config.epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.val_loss,
            metrics.val_accuracy,
            learning_rate
        );

        if checkpoint.update(metrics.val_accuracy) {
            graph.export(&config.output_dir)?;
            write_class_list(&config.output_dir.join(CLASS_LIST_FILE), &dataset.classes)?;
            info!(
                "val_accuracy improved to {:.4}, saved model to {:?}",
                metrics.val_accuracy, config.output_dir
            );
        }

        let val_loss = metrics.val_loss;
        history.push(metrics);
        plateau.update(val_loss);
        if early_stopping.update(epoch, val_loss) {
            warn!(
                "Early stopping at epoch {} (best val_loss at epoch {})",
                epoch,
                early_stopping.best_epoch()
            );
            break;
        }
    }

    if config.output_dir.is_dir() {
        history.save(&config.output_dir.join(HISTORY_FILE))?;
    }
    info!(
        "Training finished after {} epochs, best val_accuracy {:.4}",
        epochs_run,
        checkpoint.best()
    );

    Ok(TrainingReport {
        classes: dataset.classes.clone(),
        epochs_run,
        best_val_accuracy: checkpoint.best(),
        history,
        output_dir: config.output_dir.clone(),
    })
}

fn evaluate(
    graph: &TransferGraph,
    samples: &[ImageSample],
    num_classes: usize,
    config: &TrainingConfig,
) -> Result<Totals> {
    let mut totals = Totals::default();
    for chunk in samples.chunks(config.batch_size) {
        let batch = load_batch(chunk, num_classes, config.image_size, |img| img)?;
        let step = graph.evaluate(&batch)?;
        totals.add(step, batch.len);
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::dataset::tests::write_dataset;
    use super::*;

    #[test]
    fn defaults_follow_the_recipe() {
        let config = TrainingConfig::default();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.epochs, 50);
        assert_eq!(config.image_size, 224);
        assert_eq!(config.validation_split, 0.2);
        assert_eq!(config.early_stopping_patience, 5);
        assert_eq!(config.lr_patience, 3);
    }

    #[test]
    fn totals_weight_loss_by_batch_size() {
        let mut totals = Totals::default();
        totals.add(StepOutput { loss: 1.0, correct: 3 }, 4);
        totals.add(StepOutput { loss: 4.0, correct: 0 }, 1);
        assert!((totals.mean_loss() - 8.0 / 5.0).abs() < 1e-9);
        assert!((totals.accuracy() - 0.6).abs() < 1e-9);
        assert_eq!(Totals::default().accuracy(), 0.0);
    }

    #[test]
    fn refuses_a_dataset_without_validation_images() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b"], &[2, 2]);
        let config = TrainingConfig {
            dataset_dir: dir.path().to_path_buf(),
            ..TrainingConfig::default()
        };
        let err = train(&config).unwrap_err();
        assert!(matches!(err, Error::Dataset(_)));
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(train(&config), Err(Error::Config(_))));
    }
}
