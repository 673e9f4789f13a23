//! Step orchestration: prepare, train, evaluate, save and load
//!
//! State produced by one step is kept in a local [`RunState`] and handed to the
//! next; nothing is global. Any step that needs a fitted model goes through
//! [`obtain_model_and_scaler`], which either reuses the model trained in this
//! run or loads the persisted pair.

use crate::config::PipelineConfig;
use crate::data::{load_and_prepare, PreparedData};
use crate::error::PipelineError;
use crate::metrics::{evaluate, Evaluation};
use crate::model::{LinearSvc, LinearSvcParams};
use crate::persist::{self, ArtifactPaths};
use crate::scaler::FittedScaler;
use linfa::traits::Fit;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Prepare,
    Train,
    Evaluate,
    Save,
    Load,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Prepare => "prepare",
            Step::Train => "train",
            Step::Evaluate => "evaluate",
            Step::Save => "save",
            Step::Load => "load",
        };
        f.write_str(name)
    }
}

/// Where Evaluate takes its model from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalSource {
    /// Model trained in this run if there is one, otherwise the saved one
    #[default]
    Auto,
    /// Only the model trained in this run
    AfterTrain,
    /// Always the saved model, even if one was trained in this run
    FromSaved,
}

/// Which steps to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepPlan {
    pub train: bool,
    pub evaluate: bool,
    pub save: bool,
    pub load: bool,
    pub eval_source: EvalSource,
}

impl StepPlan {
    /// Prepare, train, evaluate and save
    pub fn all() -> Self {
        Self {
            train: true,
            evaluate: true,
            save: true,
            ..Self::default()
        }
    }

    pub fn needs_prepare(&self) -> bool {
        self.train || self.evaluate || self.save
    }

    pub fn is_empty(&self) -> bool {
        !(self.needs_prepare() || self.load)
    }

    /// Reject plans whose evaluation source cannot be satisfied
    pub fn validate(&self) -> crate::Result<()> {
        match self.eval_source {
            EvalSource::Auto => Ok(()),
            _ if !self.evaluate => Err(PipelineError::Usage(
                "an evaluation mode was given without the evaluate step".to_string(),
            )),
            EvalSource::AfterTrain if !self.train => Err(PipelineError::Usage(
                "evaluating after training requires the train step".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Failure of one step; the run stops at the first one
#[derive(Debug, thiserror::Error)]
#[error("{step} step failed")]
pub struct StepError {
    pub step: Step,
    #[source]
    pub source: PipelineError,
}

impl StepError {
    fn new(step: Step, source: PipelineError) -> Self {
        Self { step, source }
    }
}

/// Where a fitted model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    Trained,
    Loaded,
}

/// A model together with the scaler its inputs must go through
#[derive(Debug, Clone, PartialEq)]
pub struct FittedArtifacts {
    pub model: LinearSvc,
    pub scaler: FittedScaler,
    pub origin: ModelOrigin,
}

/// What a run produced
#[derive(Debug, Default)]
pub struct RunReport {
    pub steps: Vec<Step>,
    pub evaluation: Option<Evaluation>,
    pub model_origin: Option<ModelOrigin>,
    pub saved: Option<ArtifactPaths>,
    pub loaded: Option<FittedArtifacts>,
}

#[derive(Default)]
struct RunState {
    prepared: Option<PreparedData>,
    fitted: Option<FittedArtifacts>,
}

/// Run the steps of `plan` in order, stopping at the first failure
pub fn run(config: &PipelineConfig, plan: &StepPlan) -> Result<RunReport, StepError> {
    let outcome = execute(config, plan);
    if let Err(err) = &outcome {
        error!(step = %err.step, error = %err.source, "pipeline aborted");
    }
    outcome
}

fn execute(config: &PipelineConfig, plan: &StepPlan) -> Result<RunReport, StepError> {
    plan.validate().map_err(|e| StepError::new(Step::Evaluate, e))?;

    let paths = ArtifactPaths::new(config.model_path(), config.scaler_path());
    let mut state = RunState::default();
    let mut report = RunReport::default();

    if plan.needs_prepare() {
        let step = Step::Prepare;
        info!(path = %config.data_path.display(), "preparing data");
        let prepared = load_and_prepare(config).map_err(|e| StepError::new(step, e))?;
        state.prepared = Some(prepared);
        report.steps.push(step);
    }

    if plan.train {
        let step = Step::Train;
        let prepared = prepared(&state, step)?;
        let fitted = train(config, prepared).map_err(|e| StepError::new(step, e))?;
        state.fitted = Some(fitted);
        report.steps.push(step);
    }

    if plan.evaluate {
        let step = Step::Evaluate;
        let fitted = obtain_model_and_scaler(&mut state, &paths, step, plan.eval_source)?;
        let prepared = prepared(&state, step)?;
        let evaluation = evaluate_fitted(&fitted, prepared).map_err(|e| StepError::new(step, e))?;
        info!(accuracy = evaluation.accuracy, origin = ?fitted.origin, "model evaluated");
        report.model_origin = Some(fitted.origin);
        report.evaluation = Some(evaluation);
        report.steps.push(step);
    }

    if plan.save {
        let step = Step::Save;
        let fitted = obtain_model_and_scaler(&mut state, &paths, step, EvalSource::Auto)?;
        persist::save(&fitted.model, &fitted.scaler, &paths).map_err(|e| StepError::new(step, e))?;
        report.saved = Some(paths.clone());
        report.steps.push(step);
    }

    if plan.load {
        let step = Step::Load;
        let loaded = persist::load(&paths).map_err(|e| StepError::new(step, e))?;
        report.loaded = Some(FittedArtifacts {
            model: loaded.model,
            scaler: loaded.scaler,
            origin: ModelOrigin::Loaded,
        });
        report.steps.push(step);
    }

    Ok(report)
}

fn prepared(state: &RunState, step: Step) -> Result<&PreparedData, StepError> {
    state.prepared.as_ref().ok_or_else(|| {
        StepError::new(
            step,
            PipelineError::Usage(format!("the {step} step needs prepared data")),
        )
    })
}

/// Fit the classifier on the training partition; the scaler fit during
/// preparation travels with it
fn train(config: &PipelineConfig, prepared: &PreparedData) -> crate::Result<FittedArtifacts> {
    info!(
        samples = prepared.x_train.nrows(),
        features = prepared.x_train.ncols(),
        "training linear SVC"
    );
    let model = LinearSvcParams::from(config.svc).fit(&prepared.train_dataset())?;
    Ok(FittedArtifacts {
        model,
        scaler: prepared.scaler.clone(),
        origin: ModelOrigin::Trained,
    })
}

/// Model and scaler for `required_for`: the pair trained in this run when
/// allowed and available, the persisted pair otherwise
fn obtain_model_and_scaler(
    state: &mut RunState,
    paths: &ArtifactPaths,
    required_for: Step,
    source: EvalSource,
) -> Result<FittedArtifacts, StepError> {
    match (&state.fitted, source) {
        (Some(fitted), EvalSource::Auto | EvalSource::AfterTrain) => return Ok(fitted.clone()),
        (None, EvalSource::AfterTrain) => {
            return Err(StepError::new(
                required_for,
                PipelineError::Usage("no model was trained in this run".to_string()),
            ));
        }
        _ => {}
    }

    let loaded = persist::load(paths).map_err(|e| StepError::new(required_for, e))?;
    info!(step = %required_for, "using the saved model and scaler");
    let fitted = FittedArtifacts {
        model: loaded.model,
        scaler: loaded.scaler,
        origin: ModelOrigin::Loaded,
    };
    // a model forced from disk for evaluation must not replace one trained in this run
    if state.fitted.is_none() {
        state.fitted = Some(fitted.clone());
    }
    Ok(fitted)
}

/// Score `fitted` on the evaluation partition, scaled with the model's own scaler
fn evaluate_fitted(fitted: &FittedArtifacts, prepared: &PreparedData) -> crate::Result<Evaluation> {
    if fitted.model.feature_names() != prepared.feature_names.as_slice() {
        return Err(PipelineError::SchemaMismatch(format!(
            "model expects features {:?}, data provides {:?}",
            fitted.model.feature_names(),
            prepared.feature_names
        )));
    }
    if fitted.scaler != prepared.scaler {
        warn!("saved scaler differs from the one fit on this data; using the saved scaler");
    }
    let x_test = prepared.test_features_with(&fitted.scaler)?;
    evaluate(&fitted.model, &x_test, &prepared.y_test)
}
