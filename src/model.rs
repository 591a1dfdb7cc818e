use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rand::Rng;
use tensorflow::{
    Graph, ImportGraphDefOptions, SavedModelBundle, Session, SessionOptions, SessionRunArgs,
    Tensor, DEFAULT_SERVING_SIGNATURE_DEF_KEY, PREDICT_INPUTS, PREDICT_OUTPUTS,
};
use tracing::{error, info, warn};

use crate::annotate::ModelSource;
use crate::catalog::{default_labels, DiseaseClass};
use crate::error::{Error, Result};
use crate::preprocess::NormalizedImage;

/// Confidence range reported while no trained model is loaded.
pub const PLACEHOLDER_CONFIDENCE: (f32, f32) = (0.75, 0.98);

const FROZEN_INPUT: &str = "x";
const FROZEN_OUTPUT: &str = "Identity";
const SERVE_TAG: &str = "serve";

#[derive(Debug, Clone, PartialEq, Eq)]
struct TensorName {
    op: String,
    index: i32,
}

/// A trained classifier loaded into a TensorFlow session.
pub struct Model {
    session: Session,
    graph: Graph,
    input: TensorName,
    output: TensorName,
}

impl Model {
    /// Loads a frozen GraphDef file or a SavedModel directory.
    pub fn load(model_path: &Path) -> Result<Self> {
        if model_path.is_dir() {
            Self::load_saved_model(model_path)
        } else {
            Self::load_frozen_graph(model_path)
        }
    }

    fn load_frozen_graph(model_path: &Path) -> Result<Self> {
        let mut graph = Graph::new();
        let mut model_file = File::open(model_path)?;
        let mut model_bytes = Vec::new();
        model_file.read_to_end(&mut model_bytes)?;

        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        Ok(Model {
            session,
            graph,
            input: TensorName {
                op: FROZEN_INPUT.to_string(),
                index: 0,
            },
            output: TensorName {
                op: FROZEN_OUTPUT.to_string(),
                index: 0,
            },
        })
    }

    fn load_saved_model(model_dir: &Path) -> Result<Self> {
        let mut graph = Graph::new();
        let bundle =
            SavedModelBundle::load(&SessionOptions::new(), [SERVE_TAG], &mut graph, model_dir)?;

        let (input, output) = {
            let signature = bundle
                .meta_graph_def()
                .get_signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY)?;
            let input = signature.get_input(PREDICT_INPUTS)?.name();
            let output = signature.get_output(PREDICT_OUTPUTS)?.name();
            (
                TensorName {
                    op: input.name.clone(),
                    index: input.index,
                },
                TensorName {
                    op: output.name.clone(),
                    index: output.index,
                },
            )
        };

        Ok(Model {
            session: bundle.session,
            graph,
            input,
            output,
        })
    }

    /// Runs one forward pass and returns the probability vector.
    pub fn predict(&self, image: &NormalizedImage) -> Result<Vec<f32>> {
        let input_tensor = Tensor::<f32>::new(&image.dims()).with_values(&image.data)?;

        let input_operation = self.graph.operation_by_name_required(&self.input.op)?;
        let output_operation = self.graph.operation_by_name_required(&self.output.op)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, self.input.index, &input_tensor);
        let output_token = args.request_fetch(&output_operation, self.output.index);
        self.session.run(&mut args)?;
        let output_tensor: Tensor<f32> = args.fetch(output_token)?;

        Ok(output_tensor.to_vec())
    }
}

/// Index and value of the largest probability.
pub fn arg_max(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((i, p)),
        })
}

/// Reads a class list file, one label per line.
pub fn read_class_list(path: &Path) -> Result<Vec<String>> {
    let labels: Vec<String> = std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(Error::Config(format!("class list {:?} is empty", path)));
    }
    Ok(labels)
}

/// Class list next to the model when present, the catalog order otherwise.
pub fn resolve_labels(class_list_path: &Path) -> Vec<String> {
    if !class_list_path.exists() {
        return default_labels();
    }
    match read_class_list(class_list_path) {
        Ok(labels) => {
            info!("Loaded {} labels from {:?}", labels.len(), class_list_path);
            labels
        }
        Err(err) => {
            warn!("Ignoring class list {:?}: {}", class_list_path, err);
            default_labels()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
    pub source: ModelSource,
}

/// The serving model plus the fallback used while none is available.
pub struct Classifier {
    model: Option<Model>,
    model_path: PathBuf,
    labels: Vec<String>,
}

impl Classifier {
    /// Never fails: load problems are logged and leave the classifier in demo mode.
    pub fn load(model_path: impl Into<PathBuf>, labels: Vec<String>) -> Self {
        let model_path = model_path.into();
        let model = try_load(&model_path);
        Classifier {
            model,
            model_path,
            labels,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Swaps in a freshly loaded model (or none) and returns whether one is loaded.
    pub fn replace(&mut self, model: Option<Model>, labels: Vec<String>) -> bool {
        self.model = model;
        self.labels = labels;
        self.is_loaded()
    }

    pub fn classify(&self, image: &NormalizedImage) -> Result<Classification> {
        match &self.model {
            Some(model) => {
                let probabilities = model.predict(image)?;
                let (index, confidence) = arg_max(&probabilities)
                    .ok_or_else(|| Error::Model("model returned no probabilities".into()))?;
                let label = self
                    .labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", index));

                info!(
                    "Model prediction: {} (confidence {:.2}%)",
                    label,
                    confidence * 100.0
                );
                Ok(Classification {
                    label,
                    confidence,
                    source: ModelSource::Trained,
                })
            }
            None => {
                warn!("Demo mode: returning a simulated prediction");
                Ok(placeholder_classification(&mut rand::thread_rng()))
            }
        }
    }
}

pub fn try_load(model_path: &Path) -> Option<Model> {
    if !model_path.exists() {
        warn!("Model not found at {:?}", model_path);
        warn!("Demo mode enabled: predictions are random");
        return None;
    }

    info!("Loading model from {:?}", model_path);
    match Model::load(model_path) {
        Ok(model) => {
            info!("Model loaded");
            Some(model)
        }
        Err(err) => {
            error!("Failed to load model from {:?}: {}", model_path, err);
            None
        }
    }
}

pub fn placeholder_classification<R: Rng>(rng: &mut R) -> Classification {
    let class = DiseaseClass::ALL[rng.gen_range(0..DiseaseClass::ALL.len())];
    let (low, high) = PLACEHOLDER_CONFIDENCE;
    Classification {
        label: class.label().to_string(),
        confidence: rng.gen_range(low..=high),
        source: ModelSource::Placeholder,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tensorflow::{ops, DataType, Scope};

    use super::*;

    fn blank_image() -> NormalizedImage {
        NormalizedImage {
            data: vec![0.5; 224 * 224 * 3],
            height: 224,
            width: 224,
        }
    }

    #[test]
    fn placeholder_stays_within_catalog_and_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let c = placeholder_classification(&mut rng);
            assert!(DiseaseClass::from_label(&c.label).is_some());
            assert!((0.75..=0.98).contains(&c.confidence), "{}", c.confidence);
            assert_eq!(c.source, ModelSource::Placeholder);
        }
    }

    #[test]
    fn missing_model_falls_back_to_demo_mode() {
        let classifier = Classifier::load("./does/not/exist.pb", default_labels());
        assert!(!classifier.is_loaded());

        for _ in 0..50 {
            let c = classifier.classify(&blank_image()).unwrap();
            assert_eq!(c.source, ModelSource::Placeholder);
            assert!(DiseaseClass::from_label(&c.label).is_some());
        }
    }

    #[test]
    fn arg_max_picks_the_first_maximum() {
        assert_eq!(arg_max(&[0.1, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(arg_max(&[0.5, 0.5]), Some((0, 0.5)));
        assert_eq!(arg_max(&[]), None);
    }

    #[test]
    fn class_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_list.txt");
        std::fs::write(&path, "Tomato_healthy\n\nTomato_leaf_mold\n").unwrap();

        assert_eq!(
            read_class_list(&path).unwrap(),
            vec!["Tomato_healthy".to_string(), "Tomato_leaf_mold".to_string()]
        );
        assert_eq!(resolve_labels(&dir.path().join("absent.txt")), default_labels());
    }

    /// Mean colour per channel through a softmax, saved as a frozen graph.
    fn write_colour_graph(path: &Path) {
        let mut scope = Scope::new_root_scope();
        let x = ops::Placeholder::new()
            .dtype(DataType::Float)
            .build(&mut scope.with_op_name("x"))
            .unwrap();
        let axes = ops::constant(&[1i32, 2][..], &mut scope).unwrap();
        let pooled = ops::mean(x, axes, &mut scope).unwrap();
        ops::softmax(pooled, &mut scope.with_op_name("Identity")).unwrap();
        std::fs::write(path, scope.graph().graph_def().unwrap()).unwrap();
    }

    #[test]
    fn frozen_graph_predictions_use_the_class_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frozen_graph.pb");
        write_colour_graph(&path);

        let image = NormalizedImage {
            data: [0.1, 0.2, 0.9].repeat(16),
            height: 4,
            width: 4,
        };
        let labels: Vec<String> = ["red", "green", "blue"].iter().map(|s| s.to_string()).collect();
        let classifier = Classifier::load(path.clone(), labels);
        assert!(classifier.is_loaded());

        let c = classifier.classify(&image).unwrap();
        assert_eq!(c.label, "blue");
        assert_eq!(c.source, ModelSource::Trained);
        assert!(c.confidence > 1.0 / 3.0 && c.confidence <= 1.0);

        let short = Classifier::load(path, vec!["red".to_string(), "green".to_string()]);
        assert_eq!(short.classify(&image).unwrap().label, "class_2");
    }
}
