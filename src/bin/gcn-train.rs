//! Train a GCN on a citation dataset.
//!
//! ```bash
//! gcn-train --dataset cora --data-dir data/cora
//! gcn-train --dataset citeseer --variant egl --backend chunked --epochs 100
//! gcn-train --dataset cora-npz --data-dir datasets/cora.npz --config gcn.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_gcn::backend::BackendKind;
use candle_gcn::config::{ActivationKind, ExperimentConfig};
use candle_gcn::datasets::{CitationDataset, Cora, Linqs, PubMed};
use candle_gcn::models::{EglGcn, Gcn, GnnModule};
use candle_gcn::train::{TrainReport, Trainer};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DatasetName {
    /// Planetoid-exported `.npz` file.
    CoraNpz,
    Cora,
    Citeseer,
    Pubmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Variant {
    /// Built-in copy-src / sum message passing.
    Spmv,
    /// Aggregation offloaded through the context manager.
    Egl,
}

#[derive(Parser, Debug)]
#[command(name = "gcn-train")]
#[command(about = "Train a graph convolutional network on a citation graph")]
struct Args {
    #[arg(long, value_enum, default_value = "cora")]
    dataset: DatasetName,

    /// Dataset root directory, or the `.npz` file for `cora-npz`.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// JSON experiment config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "spmv")]
    variant: Variant,

    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    hidden: Option<usize>,

    /// Number of hidden layers.
    #[arg(long)]
    layers: Option<usize>,

    #[arg(long)]
    dropout: Option<f32>,

    #[arg(long, value_enum)]
    activation: Option<ActivationKind>,

    /// Disable self loops.
    #[arg(long)]
    no_self_loop: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn experiment(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => ExperimentConfig::default(),
        };
        let (model, train) = (&mut config.model, &mut config.train);
        if let Some(backend) = self.backend {
            train.backend = backend;
        }
        if let Some(epochs) = self.epochs {
            train.epochs = epochs;
        }
        if let Some(lr) = self.lr {
            train.lr = lr;
        }
        if self.no_self_loop {
            train.self_loop = false;
        }
        if let Some(hidden) = self.hidden {
            model.n_hidden = hidden;
        }
        if let Some(layers) = self.layers {
            model.n_layers = layers;
        }
        if let Some(dropout) = self.dropout {
            model.dropout = dropout;
        }
        if let Some(activation) = self.activation {
            model.activation = activation;
        }
        Ok(config)
    }

    fn load(&self, device: &Device) -> Result<CitationDataset> {
        let dataset = match self.dataset {
            DatasetName::CoraNpz => Cora::from_file(&self.data_dir, device)?,
            DatasetName::Cora => Linqs::cora(&self.data_dir, device)?,
            DatasetName::Citeseer => Linqs::citeseer(&self.data_dir, device)?,
            DatasetName::Pubmed => PubMed::load(&self.data_dir, device)?,
        };
        Ok(dataset)
    }
}

fn run<M: GnnModule>(
    model: M,
    varmap: &VarMap,
    config: &ExperimentConfig,
    dataset: &CitationDataset,
) -> Result<TrainReport> {
    let mut trainer = Trainer::new(model, varmap, config.train.clone())?;
    Ok(trainer.fit(dataset)?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let device = Device::Cpu;
    let mut config = args.experiment()?;
    let dataset = args.load(&device).context("loading dataset")?;
    config.model.in_feats = dataset.num_features();
    config.model.n_classes = dataset.num_classes;
    config.validate()?;
    info!(?config, variant = ?args.variant, "starting");

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let report = match args.variant {
        Variant::Spmv => run(Gcn::new(&config.model, vs)?, &varmap, &config, &dataset)?,
        Variant::Egl => {
            let backend = config.train.backend.build();
            run(EglGcn::new(&config.model, backend, vs)?, &varmap, &config, &dataset)?
        }
    };

    println!(
        "Test accuracy {:5.2}% (train {:5.2}%, val {:5.2}%)",
        100.0 * report.evaluation.test_accuracy,
        100.0 * report.evaluation.train_accuracy,
        100.0 * report.evaluation.val_accuracy,
    );
    Ok(())
}
