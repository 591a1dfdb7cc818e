use std::path::PathBuf;

use clap::Parser;
use plant_disease_service_rs::training::{train, TrainingConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fine-tune a classification head on a frozen feature extractor.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Dataset laid out as <dir>/<class name>/<images>
    #[arg(long, default_value = "data/tomato")]
    dataset: PathBuf,

    /// Frozen GraphDef (.pb) of the feature extractor
    #[arg(long)]
    base_model: PathBuf,

    /// Input tensor of the feature extractor
    #[arg(long, default_value = "x")]
    base_input: String,

    /// Spatial feature map output of the feature extractor
    #[arg(long, default_value = "Identity")]
    base_output: String,

    /// SavedModel directory to write
    #[arg(long, default_value = "models/tomato_disease_model")]
    output: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 0.001)]
    learning_rate: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> TrainingConfig {
        TrainingConfig {
            dataset_dir: self.dataset,
            base_model: self.base_model,
            base_input: self.base_input,
            base_output: self.base_output,
            output_dir: self.output,
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed: self.seed,
            ..TrainingConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config();
    info!("Training configuration: {:?}", config);

    let report = train(&config)?;
    info!(
        "Best val_accuracy {:.4} after {} epochs; model in {:?}",
        report.best_val_accuracy, report.epochs_run, report.output_dir
    );
    info!("Classes: {}", report.classes.join(", "));

    Ok(())
}
