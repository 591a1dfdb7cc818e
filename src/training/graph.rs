//! TensorFlow graph for transfer learning: a frozen feature extractor with a
//! small trainable classification head on top.

use std::fs;
use std::path::Path;

use tensorflow::{
    ops,
    train::{AdamOptimizer, MinimizeOptions, Optimizer},
    DataType, ImportGraphDefOptions, Operation, Output, OutputName, SavedModelBuilder,
    SavedModelSaver, Scope, Session, SessionOptions, SessionRunArgs, Shape, SignatureDef, Tensor,
    TensorInfo, Variable, DEFAULT_SERVING_SIGNATURE_DEF_KEY, PREDICT_INPUTS, PREDICT_METHOD_NAME,
    PREDICT_OUTPUTS,
};
use tracing::info;

use super::dataset::Batch;
use crate::error::{Error, Result};
use crate::model::arg_max;

const BASE_PREFIX: &str = "base";

#[derive(Debug, Clone)]
pub struct HeadConfig {
    /// Channels produced by the feature extractor.
    pub feature_dim: u64,
    pub hidden_units: u64,
    pub num_classes: u64,
    /// Fraction of activations dropped during training.
    pub dropout: f32,
    pub image_size: u32,
}

/// Loss and number of correct predictions for one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f32,
    pub correct: usize,
}

struct Dense {
    weights: Variable,
    bias: Variable,
}

impl Dense {
    fn new(name: &str, input_dim: u64, output_dim: u64, scope: &mut Scope) -> Result<Self> {
        let mut scope = scope.new_sub_scope(name);
        let scope = &mut scope;

        let w_shape = ops::constant(&[input_dim as i64, output_dim as i64][..], scope)?;
        let stddev = (2.0 / (input_dim + output_dim) as f32).sqrt();
        let initial = ops::mul(
            ops::RandomStandardNormal::new()
                .dtype(DataType::Float)
                .build(w_shape, scope)?,
            ops::constant(stddev, scope)?,
            scope,
        )?;
        let weights = Variable::builder()
            .initial_value(initial)
            .data_type(DataType::Float)
            .shape([input_dim, output_dim])
            .build(&mut scope.with_op_name("weights"))?;
        let bias = Variable::builder()
            .const_initial_value(Tensor::<f32>::new(&[output_dim]))
            .build(&mut scope.with_op_name("bias"))?;

        Ok(Dense { weights, bias })
    }

    fn apply<O: Into<Output>>(&self, input: O, scope: &mut Scope) -> Result<Operation> {
        Ok(ops::add(
            ops::mat_mul(input, self.weights.output().clone(), scope)?,
            self.bias.output().clone(),
            scope,
        )?)
    }

    fn variables(&self) -> [Variable; 2] {
        [self.weights.clone(), self.bias.clone()]
    }
}

/// Inverted dropout: scales kept activations by `1 / keep`.
fn dropout(x: Operation, keep: f32, scope: &mut Scope) -> Result<Operation> {
    let shape = ops::shape(x.clone(), scope)?;
    let noise = ops::RandomUniform::new()
        .dtype(DataType::Float)
        .build(shape, scope)?;
    let mask = ops::floor(ops::add(noise, ops::constant(keep, scope)?, scope)?, scope)?;
    let scaled = ops::div(x, ops::constant(keep, scope)?, scope)?;
    Ok(ops::mul(scaled, mask, scope)?)
}

fn mean_cross_entropy(logits: Operation, labels: Operation, scope: &mut Scope) -> Result<Operation> {
    let xent = ops::softmax_cross_entropy_with_logits(logits, labels, scope)?;
    let per_example = Output {
        operation: xent,
        index: 0,
    };
    Ok(ops::mean(per_example, ops::constant(&[0i32][..], scope)?, scope)?)
}

pub struct TransferGraph {
    scope: Scope,
    session: Session,
    saver: SavedModelSaver,
    head: HeadConfig,
    input: Operation,
    labels: Operation,
    learning_rate: Operation,
    train_logits: Operation,
    train_loss: Operation,
    probabilities: Operation,
    eval_loss: Operation,
    minimize: Operation,
}

impl TransferGraph {
    /// Imports the frozen base graph and builds the head, the optimizer and
    /// the SavedModel signature on top of it.
    pub fn build(
        base_graph_def: &[u8],
        base_input: &str,
        base_output: &str,
        head: HeadConfig,
    ) -> Result<Self> {
        let mut scope = Scope::new_root_scope();
        {
            let mut options = ImportGraphDefOptions::new();
            options.set_prefix(BASE_PREFIX)?;
            scope.graph_mut().import_graph_def(base_graph_def, &options)?;
        }
        let (input, features) = {
            let graph = scope.graph();
            (
                graph.operation_by_name_required(&format!("{}/{}", BASE_PREFIX, base_input))?,
                graph.operation_by_name_required(&format!("{}/{}", BASE_PREFIX, base_output))?,
            )
        };
        info!(
            "Imported feature extractor: {} -> {}",
            base_input, base_output
        );

        let labels = ops::Placeholder::new()
            .dtype(DataType::Float)
            .build(&mut scope.with_op_name("labels"))?;
        let learning_rate = ops::Placeholder::new()
            .dtype(DataType::Float)
            .build(&mut scope.with_op_name("learning_rate"))?;

        let pooled = ops::mean(features, ops::constant(&[1i32, 2][..], &mut scope)?, &mut scope)?;

        let hidden = Dense::new("hidden", head.feature_dim, head.hidden_units, &mut scope)?;
        let output = Dense::new("output", head.hidden_units, head.num_classes, &mut scope)?;
        let keep = 1.0 - head.dropout;

        let train_logits = {
            let x = dropout(pooled.clone(), keep, &mut scope)?;
            let x = ops::relu(hidden.apply(x, &mut scope)?, &mut scope)?;
            let x = dropout(x, keep, &mut scope)?;
            output.apply(x, &mut scope)?
        };
        let eval_logits = {
            let x = ops::relu(hidden.apply(pooled, &mut scope)?, &mut scope)?;
            output.apply(x, &mut scope)?
        };
        let probabilities =
            ops::softmax(eval_logits.clone(), &mut scope.with_op_name("probabilities"))?;

        let train_loss = mean_cross_entropy(train_logits.clone(), labels.clone(), &mut scope)?;
        let eval_loss = mean_cross_entropy(eval_logits, labels.clone(), &mut scope)?;

        let mut variables = Vec::new();
        variables.extend(hidden.variables());
        variables.extend(output.variables());

        let mut optimizer = AdamOptimizer::new();
        optimizer.set_learning_rate(learning_rate.clone());
        let (optimizer_variables, minimize) = optimizer.minimize(
            &mut scope,
            train_loss.clone().into(),
            MinimizeOptions::default().with_variables(&variables),
        )?;

        let mut all_variables = variables.clone();
        all_variables.extend_from_slice(&optimizer_variables);

        let mut builder = SavedModelBuilder::new();
        builder
            .add_collection("train", &all_variables)
            .add_tag("serve")
            .add_signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY, {
                let mut def = SignatureDef::new(PREDICT_METHOD_NAME.to_string());
                def.add_input_info(
                    PREDICT_INPUTS.to_string(),
                    TensorInfo::new(
                        DataType::Float,
                        Shape::from(None),
                        OutputName {
                            name: input.name()?,
                            index: 0,
                        },
                    ),
                );
                def.add_output_info(
                    PREDICT_OUTPUTS.to_string(),
                    TensorInfo::new(
                        DataType::Float,
                        Shape::from(None),
                        OutputName {
                            name: probabilities.name()?,
                            index: 0,
                        },
                    ),
                );
                def
            });
        let saver = builder
            .inject(&mut scope)
            .map_err(|e| Error::Model(e.to_string()))?;

        let session = Session::new(&SessionOptions::new(), &scope.graph())?;
        let mut init = SessionRunArgs::new();
        for var in &all_variables {
            init.add_target(&var.initializer());
        }
        session.run(&mut init)?;

        Ok(TransferGraph {
            scope,
            session,
            saver,
            head,
            input,
            labels,
            learning_rate,
            train_logits,
            train_loss,
            probabilities,
            eval_loss,
            minimize,
        })
    }

    fn batch_tensors(&self, batch: &Batch) -> Result<(Tensor<f32>, Tensor<f32>)> {
        let size = self.head.image_size as u64;
        let n = batch.len as u64;
        let images = Tensor::<f32>::new(&[n, size, size, 3]).with_values(&batch.images)?;
        let labels =
            Tensor::<f32>::new(&[n, self.head.num_classes]).with_values(&batch.labels)?;
        Ok((images, labels))
    }

    /// One optimizer step on `batch`.
    pub fn train_step(&self, batch: &Batch, learning_rate: f32) -> Result<StepOutput> {
        let (images, labels) = self.batch_tensors(batch)?;
        let lr = Tensor::<f32>::new(&[]).with_values(&[learning_rate])?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&self.input, 0, &images);
        args.add_feed(&self.labels, 0, &labels);
        args.add_feed(&self.learning_rate, 0, &lr);
        args.add_target(&self.minimize);
        let loss_token = args.request_fetch(&self.train_loss, 0);
        let logits_token = args.request_fetch(&self.train_logits, 0);
        self.session.run(&mut args)?;

        let loss: Tensor<f32> = args.fetch(loss_token)?;
        let logits: Tensor<f32> = args.fetch(logits_token)?;
        Ok(StepOutput {
            loss: loss[0],
            correct: count_correct(&logits, &batch.labels, self.head.num_classes as usize),
        })
    }

    /// Loss and accuracy without dropout or weight updates.
    pub fn evaluate(&self, batch: &Batch) -> Result<StepOutput> {
        let (images, labels) = self.batch_tensors(batch)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&self.input, 0, &images);
        args.add_feed(&self.labels, 0, &labels);
        let loss_token = args.request_fetch(&self.eval_loss, 0);
        let probs_token = args.request_fetch(&self.probabilities, 0);
        self.session.run(&mut args)?;

        let loss: Tensor<f32> = args.fetch(loss_token)?;
        let probabilities: Tensor<f32> = args.fetch(probs_token)?;
        Ok(StepOutput {
            loss: loss[0],
            correct: count_correct(
                &probabilities,
                &batch.labels,
                self.head.num_classes as usize,
            ),
        })
    }

    /// Writes a SavedModel to `target`, replacing whatever was there only once
    /// the new export is complete.
    pub fn export(&self, target: &Path) -> Result<()> {
        let staging = target.with_extension("staging");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        self.saver
            .save(&self.session, &self.scope.graph(), &staging)
            .map_err(|e| Error::Model(e.to_string()))?;

        if target.is_dir() {
            fs::remove_dir_all(target)?;
        } else if target.exists() {
            fs::remove_file(target)?;
        }
        fs::rename(&staging, target)?;
        Ok(())
    }
}

/// Rows of `scores` whose arg-max matches the one-hot row of `labels`.
pub fn count_correct(scores: &[f32], labels: &[f32], num_classes: usize) -> usize {
    scores
        .chunks(num_classes)
        .zip(labels.chunks(num_classes))
        .filter(|(s, l)| match (arg_max(s), arg_max(l)) {
            (Some((predicted, _)), Some((expected, _))) => predicted == expected,
            _ => false,
        })
        .count()
}
