//! Command-line interface definitions and argument parsing

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{EvalSource, StepPlan};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Customer churn prediction: prepare data, train a linear SVC, evaluate and persist it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("evaluation").args(["run_all", "evaluate"]).multiple(true)))]
pub struct Args {
    /// Run every step: prepare, train, evaluate, save
    #[arg(long = "all")]
    pub run_all: bool,

    /// Train the model (prepares the data first)
    #[arg(long)]
    pub train: bool,

    /// Evaluate the trained model, or the saved one if nothing was trained
    #[arg(long)]
    pub evaluate: bool,

    /// Save the trained model and its scaler, or re-save the loaded pair
    #[arg(long)]
    pub save: bool,

    /// Load the saved model and scaler
    #[arg(long)]
    pub load: bool,

    /// Check the data file and model directory before running
    #[arg(long)]
    pub test_env: bool,

    /// Evaluate only the model trained in this run
    #[arg(long, conflicts_with = "eval_from_saved")]
    pub eval_after_train: bool,

    /// Evaluate the saved model even if one was trained in this run
    #[arg(long, requires = "evaluation")]
    pub eval_from_saved: bool,

    /// Path to the input CSV file
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Directory holding the model and scaler files
    #[arg(short, long)]
    pub model_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seed for the train/test split
    #[arg(long)]
    pub seed: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Defaults, then the TOML file if given, then command-line overrides
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(data) = &self.data {
            config.data_path = data.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }

    /// Steps requested by the flags
    pub fn step_plan(&self) -> crate::Result<StepPlan> {
        let eval_source = match (self.eval_after_train, self.eval_from_saved) {
            (true, true) => {
                return Err(PipelineError::Usage(
                    "--eval-after-train and --eval-from-saved are mutually exclusive".to_string(),
                ))
            }
            (true, false) => EvalSource::AfterTrain,
            (false, true) => EvalSource::FromSaved,
            (false, false) => EvalSource::Auto,
        };
        let plan = StepPlan {
            train: self.run_all || self.train,
            evaluate: self.run_all || self.evaluate,
            save: self.run_all || self.save,
            load: self.load,
            eval_source,
        };
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("churnforge").chain(args.iter().copied()))
    }

    #[test]
    fn test_all_expands_to_every_step() {
        let plan = parse(&["--all"]).unwrap().step_plan().unwrap();
        assert_eq!(plan, StepPlan::all());
    }

    #[test]
    fn test_individual_steps() {
        let plan = parse(&["--evaluate", "--load"]).unwrap().step_plan().unwrap();
        assert!(plan.evaluate && plan.load);
        assert!(!plan.train && !plan.save);
        assert_eq!(plan.eval_source, EvalSource::Auto);
    }

    #[test]
    fn test_no_flags_is_empty_plan() {
        let plan = parse(&[]).unwrap().step_plan().unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_eval_from_saved_requires_evaluate() {
        let err = parse(&["--eval-from-saved"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let plan = parse(&["--evaluate", "--eval-from-saved"])
            .unwrap()
            .step_plan()
            .unwrap();
        assert_eq!(plan.eval_source, EvalSource::FromSaved);
    }

    #[test]
    fn test_all_satisfies_eval_from_saved() {
        let plan = parse(&["--all", "--eval-from-saved"])
            .unwrap()
            .step_plan()
            .unwrap();
        assert!(plan.train && plan.evaluate && plan.save);
        assert_eq!(plan.eval_source, EvalSource::FromSaved);
    }

    #[test]
    fn test_eval_modes_conflict() {
        let err = parse(&["--evaluate", "--eval-after-train", "--eval-from-saved"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_eval_after_train_requires_training() {
        let err = parse(&["--evaluate", "--eval-after-train"])
            .unwrap()
            .step_plan()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Usage(_)));

        assert!(parse(&["--train", "--evaluate", "--eval-after-train"])
            .unwrap()
            .step_plan()
            .is_ok());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = parse(&["--data", "data/churn.csv", "--model-dir", "out", "--seed", "7"]).unwrap();
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.data_path, Path::new("data/churn.csv"));
        assert_eq!(config.model_path(), Path::new("out/linear_svc_model.bin"));
        assert_eq!(config.seed, 7);
    }
}
