//! Linear support-vector classifier trained in the primal

use crate::config::SvcConfig;
use crate::error::PipelineError;
use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Maximum conjugate-gradient steps per Newton iteration
const MAX_CG_STEPS: usize = 250;
/// Maximum halvings of the Newton step during line search
const MAX_LINE_SEARCH_STEPS: usize = 30;
/// Sufficient decrease constant of the Armijo condition
const ARMIJO: f64 = 0.01;

/// Hyperparameters of [`LinearSvc`]
///
/// The optimization problem is always the primal one,
/// `min_w ½‖w‖² + C Σ max(0, 1 − yᵢ w·xᵢ)²`, with the bias appended to `w` as
/// the weight of a constant feature. With many more samples than features the
/// primal has far fewer unknowns than the dual, so there is no switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSvcParams {
    c: f64,
    tol: f64,
    max_iter: usize,
}

impl Default for LinearSvcParams {
    fn default() -> Self {
        SvcConfig::default().into()
    }
}

impl From<SvcConfig> for LinearSvcParams {
    fn from(config: SvcConfig) -> Self {
        Self {
            c: config.c,
            tol: config.tol,
            max_iter: config.max_iter,
        }
    }
}

impl LinearSvcParams {
    /// Inverse regularization strength
    pub fn c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    /// Stop once the gradient norm drops below `tol` times its initial value
    pub fn tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn check(&self) -> crate::Result<()> {
        if !(self.c > 0.0 && self.c.is_finite()) {
            return Err(PipelineError::Config(format!("C must be positive, got {}", self.c)));
        }
        if !(self.tol > 0.0) {
            return Err(PipelineError::Config(format!(
                "tolerance must be positive, got {}",
                self.tol
            )));
        }
        if self.max_iter == 0 {
            return Err(PipelineError::Config("max_iter must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Fitted linear decision boundary `w·x + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvc {
    coef: Vec<f64>,
    intercept: f64,
    /// Smaller label first; a positive decision value predicts `classes[1]`
    classes: [usize; 2],
    feature_names: Vec<String>,
    n_iter: usize,
    converged: bool,
}

impl LinearSvc {
    pub fn params() -> LinearSvcParams {
        LinearSvcParams::default()
    }

    pub fn coef(&self) -> &[f64] {
        &self.coef
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn classes(&self) -> [usize; 2] {
        self.classes
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.coef.len()
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Signed distance to the boundary (scaled by ‖w‖) for every row
    pub fn decision_function(&self, features: &Array2<f64>) -> crate::Result<Array1<f64>> {
        self.check_features(features)?;
        Ok(self.scores(features))
    }

    /// Predict labels, checking the feature count first
    pub fn try_predict(&self, features: &Array2<f64>) -> crate::Result<Array1<usize>> {
        self.check_features(features)?;
        Ok(self.labels(&self.scores(features)))
    }

    fn check_features(&self, features: &Array2<f64>) -> crate::Result<()> {
        if features.ncols() != self.coef.len() {
            return Err(PipelineError::dimension(
                "model input features",
                self.coef.len(),
                features.ncols(),
            ));
        }
        Ok(())
    }

    fn scores(&self, features: &Array2<f64>) -> Array1<f64> {
        features.dot(&ArrayView1::from(&self.coef[..])) + self.intercept
    }

    fn labels(&self, scores: &Array1<f64>) -> Array1<usize> {
        scores.mapv(|s| if s > 0.0 { self.classes[1] } else { self.classes[0] })
    }
}

impl PredictInplace<Array2<f64>, Array1<usize>> for LinearSvc {
    fn predict_inplace(&self, x: &Array2<f64>, y: &mut Array1<usize>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        assert_eq!(
            x.ncols(),
            self.coef.len(),
            "The number of features must match the fitted model."
        );
        y.assign(&self.labels(&self.scores(x)));
    }

    fn default_target(&self, x: &Array2<f64>) -> Array1<usize> {
        Array1::zeros(x.nrows())
    }
}

impl Fit<Array2<f64>, Array1<usize>, PipelineError> for LinearSvcParams {
    type Object = LinearSvc;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<usize>>) -> crate::Result<LinearSvc> {
        self.check()?;

        let records = &dataset.records;
        let targets = &dataset.targets;
        let n_samples = records.nrows();
        if targets.len() != n_samples {
            return Err(PipelineError::dimension("training labels", n_samples, targets.len()));
        }
        if n_samples == 0 {
            return Err(PipelineError::InvalidData(
                "cannot train on an empty dataset".to_string(),
            ));
        }

        let classes = binary_classes(targets)?;
        let y = targets.mapv(|t| if t == classes[1] { 1.0 } else { -1.0 });
        // constant column carries the bias
        let augmented = concatenate(Axis(1), &[records.view(), Array2::<f64>::ones((n_samples, 1)).view()])
            .map_err(|e| PipelineError::InvalidData(format!("cannot append bias column: {e}")))?;

        let problem = SquaredHinge {
            x: &augmented,
            y: &y,
            c: self.c,
        };
        let (weights, n_iter, converged) = problem.minimize(self.tol, self.max_iter);

        if converged {
            info!(iterations = n_iter, "linear SVC converged");
        } else {
            warn!(
                max_iter = self.max_iter,
                "linear SVC did not converge; consider increasing max_iter"
            );
        }

        let n_features = records.ncols();
        let names = dataset.feature_names().to_vec();
        let feature_names = if names.len() == n_features {
            names
        } else {
            (0..n_features).map(|i| format!("feature-{i}")).collect()
        };

        Ok(LinearSvc {
            coef: weights.slice(ndarray::s![..n_features]).to_vec(),
            intercept: weights[n_features],
            classes,
            feature_names,
            n_iter,
            converged,
        })
    }
}

/// The two sorted class labels, or an error if there are not exactly two
fn binary_classes(targets: &Array1<usize>) -> crate::Result<[usize; 2]> {
    let mut classes: Vec<usize> = targets.to_vec();
    classes.sort_unstable();
    classes.dedup();
    match classes[..] {
        [neg, pos] => Ok([neg, pos]),
        _ => Err(PipelineError::InvalidData(format!(
            "binary classifier needs exactly two classes in the training labels, found {classes:?}"
        ))),
    }
}

/// L2-regularized squared-hinge objective over bias-augmented features
struct SquaredHinge<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    c: f64,
}

impl SquaredHinge<'_> {
    /// Margin violations `1 − yᵢ w·xᵢ`, clipped at zero
    fn violations(&self, w: &Array1<f64>) -> Array1<f64> {
        let margins = self.x.dot(w) * self.y;
        margins.mapv(|m| (1.0 - m).max(0.0))
    }

    fn objective(&self, w: &Array1<f64>) -> f64 {
        let xi = self.violations(w);
        0.5 * w.dot(w) + self.c * xi.dot(&xi)
    }

    fn gradient(&self, w: &Array1<f64>, xi: &Array1<f64>) -> Array1<f64> {
        let weighted = xi * self.y;
        w - &(self.x.t().dot(&weighted) * (2.0 * self.c))
    }

    /// Generalized Hessian-vector product `v + 2C Xᵀ D X v`, where D masks the
    /// rows that violate the margin
    fn hessian_dot(&self, active: &Array1<f64>, v: &Array1<f64>) -> Array1<f64> {
        let xv = self.x.dot(v) * active;
        v + &(self.x.t().dot(&xv) * (2.0 * self.c))
    }

    /// Truncated Newton: conjugate gradient for the step, Armijo backtracking
    /// for its length. Returns the weights, iterations used and convergence.
    fn minimize(&self, tol: f64, max_iter: usize) -> (Array1<f64>, usize, bool) {
        let mut w = Array1::<f64>::zeros(self.x.ncols());
        let mut f = self.objective(&w);
        let mut xi = self.violations(&w);
        let mut grad = self.gradient(&w, &xi);
        let initial_norm = norm(&grad);
        if initial_norm == 0.0 {
            return (w, 0, true);
        }

        for iter in 1..=max_iter {
            let active = xi.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            let step = self.newton_direction(&active, &grad);
            let slope = grad.dot(&step);

            let mut t = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_LINE_SEARCH_STEPS {
                let candidate = &w + &(&step * t);
                let f_candidate = self.objective(&candidate);
                if f_candidate <= f + ARMIJO * t * slope {
                    accepted = Some((candidate, f_candidate));
                    break;
                }
                t *= 0.5;
            }
            let Some((next, f_next)) = accepted else {
                debug!(iteration = iter, "line search failed to decrease the objective");
                return (w, iter, false);
            };

            w = next;
            f = f_next;
            xi = self.violations(&w);
            grad = self.gradient(&w, &xi);
            let grad_norm = norm(&grad);
            debug!(iteration = iter, objective = f, grad_norm, step = t, "newton step");
            if grad_norm <= tol * initial_norm {
                return (w, iter, true);
            }
        }
        (w, max_iter, false)
    }

    /// Approximately solve `H d = −g` with conjugate gradient
    fn newton_direction(&self, active: &Array1<f64>, grad: &Array1<f64>) -> Array1<f64> {
        let mut d = Array1::<f64>::zeros(grad.len());
        let mut r = -grad;
        let mut p = r.clone();
        let mut rr = r.dot(&r);
        let stop = 0.1 * norm(grad);

        for _ in 0..MAX_CG_STEPS {
            if rr.sqrt() <= stop {
                break;
            }
            let hp = self.hessian_dot(active, &p);
            let alpha = rr / p.dot(&hp);
            d.scaled_add(alpha, &p);
            r.scaled_add(-alpha, &hp);
            let rr_next = r.dot(&r);
            p = &r + &(p * (rr_next / rr));
            rr = rr_next;
        }
        d
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}
