//! Pipeline configuration: built-in defaults, optional TOML file, CLI overrides

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Column roles in the input table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSchema {
    /// Administrative columns removed before anything else
    pub id_columns: Vec<String>,
    /// Binary label column
    pub target: String,
    /// Columns one-hot encoded with the first level dropped
    pub categorical: Vec<String>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            id_columns: vec![
                "RowNumber".to_string(),
                "CustomerId".to_string(),
                "Surname".to_string(),
            ],
            target: "Exited".to_string(),
            categorical: vec!["Geography".to_string(), "Gender".to_string()],
        }
    }
}

impl FeatureSchema {
    /// Every column name the transformer references
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.id_columns
            .iter()
            .chain(std::iter::once(&self.target))
            .chain(self.categorical.iter())
            .map(String::as_str)
    }
}

/// Linear SVC hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvcConfig {
    /// Inverse regularization strength
    pub c: f64,
    /// Relative gradient-norm stopping tolerance
    pub tol: f64,
    /// Maximum Newton iterations
    pub max_iter: usize,
}

impl Default for SvcConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            tol: 1e-4,
            max_iter: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_path: PathBuf,
    pub model_dir: PathBuf,
    pub model_file: String,
    pub scaler_file: String,
    /// Seed for the train/test permutation
    pub seed: u64,
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    pub svc: SvcConfig,
    pub schema: FeatureSchema,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("Churn_Modelling.csv"),
            model_dir: PathBuf::from("models"),
            model_file: "linear_svc_model.bin".to_string(),
            scaler_file: "scaler.bin".to_string(),
            seed: 42,
            test_size: 0.2,
            svc: SvcConfig::default(),
            schema: FeatureSchema::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a TOML file; keys that are absent keep their default value
    pub fn from_toml_file(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.model_dir.join(&self.scaler_file)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(PipelineError::Config(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if !(self.svc.c > 0.0 && self.svc.c.is_finite()) {
            return Err(PipelineError::Config(format!(
                "svc.c must be positive, got {}",
                self.svc.c
            )));
        }
        if !(self.svc.tol > 0.0) {
            return Err(PipelineError::Config(format!(
                "svc.tol must be positive, got {}",
                self.svc.tol
            )));
        }
        if self.svc.max_iter == 0 {
            return Err(PipelineError::Config("svc.max_iter must be at least 1".into()));
        }
        if self.model_file.is_empty() || self.scaler_file.is_empty() {
            return Err(PipelineError::Config("artifact file names must not be empty".into()));
        }
        if self.model_file == self.scaler_file {
            return Err(PipelineError::Config(
                "model_file and scaler_file must differ".into(),
            ));
        }
        if self.schema.target.is_empty() {
            return Err(PipelineError::Config("schema.target must not be empty".into()));
        }
        Ok(())
    }
}
