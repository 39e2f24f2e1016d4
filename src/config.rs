use std::path::Path;

use candle_nn::Activation;
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{GcnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    #[default]
    Relu,
    Elu,
    Gelu,
    Silu,
    Sigmoid,
    LeakyRelu,
}

impl From<ActivationKind> for Activation {
    fn from(kind: ActivationKind) -> Self {
        match kind {
            ActivationKind::Relu => Activation::Relu,
            ActivationKind::Elu => Activation::Elu(1.0),
            ActivationKind::Gelu => Activation::Gelu,
            ActivationKind::Silu => Activation::Silu,
            ActivationKind::Sigmoid => Activation::Sigmoid,
            ActivationKind::LeakyRelu => Activation::LeakyRelu(0.01),
        }
    }
}

/// Shape of a GCN stack.
///
/// `n_layers` counts hidden layers, so the model has `n_layers + 1`
/// graph convolutions: `in -> hidden`, `n_layers - 1` times
/// `hidden -> hidden`, then `hidden -> classes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcnConfig {
    pub in_feats: usize,
    pub n_hidden: usize,
    pub n_classes: usize,
    pub n_layers: usize,
    pub activation: ActivationKind,
    pub dropout: f32,
    pub bias: bool,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            in_feats: 0,
            n_hidden: 16,
            n_classes: 0,
            n_layers: 1,
            activation: ActivationKind::Relu,
            dropout: 0.5,
            bias: true,
        }
    }
}

impl GcnConfig {
    pub fn new(in_feats: usize, n_classes: usize) -> Self {
        Self {
            in_feats,
            n_classes,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_feats == 0 || self.n_classes == 0 {
            return Err(GcnError::InvalidConfig {
                reason: "in_feats and n_classes must be positive".to_owned(),
            });
        }
        self.validate_hyperparams()
    }

    /// Checks everything that does not depend on the dataset.
    pub fn validate_hyperparams(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(GcnError::InvalidConfig {
                reason: reason.to_owned(),
            })
        };
        if self.n_hidden == 0 {
            return invalid("n_hidden must be positive");
        }
        if self.n_layers == 0 {
            return invalid("n_layers must be at least 1");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid("dropout must be in [0, 1)");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub lr: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub self_loop: bool,
    pub eval_every: usize,
    pub backend: BackendKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            weight_decay: 5e-4,
            epochs: 200,
            self_loop: true,
            eval_every: 10,
            backend: BackendKind::Native,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lr.is_nan() || self.lr <= 0.0 {
            return Err(GcnError::InvalidConfig {
                reason: format!("lr must be positive, got {}", self.lr),
            });
        }
        if self.weight_decay.is_nan() || self.weight_decay < 0.0 {
            return Err(GcnError::InvalidConfig {
                reason: format!("weight_decay must be non-negative, got {}", self.weight_decay),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub model: GcnConfig,
    pub train: TrainConfig,
}

impl ExperimentConfig {
    /// Reads a JSON file. Missing fields take their defaults; dataset-dependent
    /// dims (`in_feats`, `n_classes`) are usually filled in afterwards and are
    /// not checked here.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.model.validate_hyperparams()?;
        config.train.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.train.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_follow_reference_setup() {
        let config = ExperimentConfig::default();
        assert_eq!(config.model.n_hidden, 16);
        assert_eq!(config.model.n_layers, 1);
        assert_eq!(config.train.epochs, 200);
        assert!(config.train.self_loop);
        // dims are unknown until a dataset is loaded
        assert!(config.validate().is_err());
        assert!(ExperimentConfig {
            model: GcnConfig::new(1433, 7),
            ..Default::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let mut model = GcnConfig::new(10, 3);
        model.n_layers = 0;
        assert!(model.validate().is_err());
        model.n_layers = 2;
        model.dropout = 1.0;
        assert!(model.validate().is_err());

        let train = TrainConfig {
            lr: 0.0,
            ..Default::default()
        };
        assert!(train.validate().is_err());
        let train = TrainConfig {
            weight_decay: f64::NAN,
            ..Default::default()
        };
        assert!(train.validate().is_err());
        let model = GcnConfig {
            dropout: f32::NAN,
            ..GcnConfig::new(10, 3)
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": {{"n_hidden": 32, "activation": "leaky_relu"}}, "train": {{"epochs": 5, "backend": "chunked"}}}}"#
        )
        .unwrap();
        let config = ExperimentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.model.n_hidden, 32);
        assert_eq!(config.model.activation, ActivationKind::LeakyRelu);
        assert_eq!(config.model.dropout, 0.5);
        assert_eq!(config.train.epochs, 5);
        assert_eq!(config.train.backend, BackendKind::Chunked);
        assert_eq!(config.train.lr, 1e-2);
    }

    #[test]
    fn invalid_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"train": {{"lr": -1.0}}}}"#).unwrap();
        assert!(matches!(
            ExperimentConfig::from_json_file(file.path()),
            Err(GcnError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn json_file_with_bad_model_values() {
        for model in [r#"{"n_layers": 0}"#, r#"{"dropout": 1.5}"#] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, r#"{{"model": {model}}}"#).unwrap();
            assert!(matches!(
                ExperimentConfig::from_json_file(file.path()),
                Err(GcnError::InvalidConfig { .. })
            ));
        }
    }
}
