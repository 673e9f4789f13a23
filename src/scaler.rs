//! Standardization fitted on the training partition and reused verbatim afterwards

use crate::error::PipelineError;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-column mean and standard deviation, addressed by feature name
///
/// Columns with zero spread get a standard deviation of 1.0, so they are
/// centred but never divided by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScaler {
    columns: Vec<String>,
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl FittedScaler {
    /// Fit on the named `columns` of `features`, whose columns are labelled by `names`
    pub fn fit(names: &[String], columns: &[String], features: &Array2<f64>) -> crate::Result<Self> {
        if names.len() != features.ncols() {
            return Err(PipelineError::dimension(
                "scaler fit feature names",
                features.ncols(),
                names.len(),
            ));
        }
        if features.nrows() == 0 {
            return Err(PipelineError::InvalidData(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }

        let mut mean = Vec::with_capacity(columns.len());
        let mut std = Vec::with_capacity(columns.len());
        for column in columns {
            let values = features.column(position(names, column)?);
            let mu = values.mean().unwrap_or(0.0);
            // population standard deviation, ddof = 0
            let sigma = values.std(0.0);
            if sigma <= f64::EPSILON {
                debug!(column = %column, "constant column, using unit scale");
                std.push(1.0);
            } else {
                std.push(sigma);
            }
            mean.push(mu);
        }

        Ok(Self {
            columns: columns.to_vec(),
            mean,
            std,
        })
    }

    /// Apply `(x - mean) / std` to every fitted column, leaving the others untouched
    pub fn transform(&self, names: &[String], features: &Array2<f64>) -> crate::Result<Array2<f64>> {
        if names.len() != features.ncols() {
            return Err(PipelineError::dimension(
                "scaler transform feature names",
                features.ncols(),
                names.len(),
            ));
        }

        let mut scaled = features.clone();
        for ((column, &mu), &sigma) in self.columns.iter().zip(&self.mean).zip(&self.std) {
            let idx = position(names, column)?;
            scaled
                .index_axis_mut(Axis(1), idx)
                .mapv_inplace(|x| (x - mu) / sigma);
        }
        Ok(scaled)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }
}

fn position(names: &[String], column: &str) -> crate::Result<usize> {
    names.iter().position(|n| n == column).ok_or_else(|| {
        PipelineError::SchemaMismatch(format!("scaled column '{column}' is not in the feature matrix"))
    })
}
