//! ChurnForge: A Rust CLI application for customer churn prediction with a linear SVC
//!
//! This library loads a customer table, one-hot encodes and standardizes it,
//! trains a linear support-vector classifier, evaluates it on a held-out split
//! and persists the model together with the scaler it was trained with.

pub mod cli;
pub mod config;
pub mod data;
pub mod env_check;
pub mod error;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod scaler;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{FeatureSchema, PipelineConfig, SvcConfig};
pub use data::{load_and_prepare, load_dataset, prepare_data, PreparedData};
pub use error::PipelineError;
pub use metrics::{evaluate, ClassificationReport, Evaluation};
pub use model::{LinearSvc, LinearSvcParams};
pub use persist::{load, save, ArtifactPaths};
pub use pipeline::{run, EvalSource, RunReport, Step, StepError, StepPlan};
pub use scaler::FittedScaler;

/// Common result type used throughout the library
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
