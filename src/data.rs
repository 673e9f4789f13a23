//! Data loading and feature preparation using Polars

use crate::config::{FeatureSchema, PipelineConfig};
use crate::error::PipelineError;
use crate::scaler::FittedScaler;
use linfa::Dataset;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// One-hot encoder for a single categorical column
///
/// Levels are sorted; the first one is the reference level and gets no
/// indicator column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEncoder {
    pub column: String,
    pub levels: Vec<String>,
}

impl CategoryEncoder {
    pub fn fit<'a>(column: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        let levels: BTreeSet<&str> = values.into_iter().collect();
        Self {
            column: column.to_string(),
            levels: levels.into_iter().map(str::to_string).collect(),
        }
    }

    /// Level dropped to keep the indicators linearly independent
    pub fn reference_level(&self) -> Option<&str> {
        self.levels.first().map(String::as_str)
    }

    pub fn indicator_names(&self) -> Vec<String> {
        self.levels
            .iter()
            .skip(1)
            .map(|level| format!("{}_{}", self.column, level))
            .collect()
    }

    /// Indicator values for one row; all zeros for the reference level
    fn encode(&self, value: &str) -> impl Iterator<Item = f64> + '_ {
        let value = value.to_string();
        self.levels
            .iter()
            .skip(1)
            .map(move |level| if *level == value { 1.0 } else { 0.0 })
    }
}

/// Train/test split of the encoded features, scaled with a scaler fit on the
/// training rows only
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Column names of the feature matrices
    pub feature_names: Vec<String>,
    /// Standardized training features
    pub x_train: Array2<f64>,
    /// Standardized evaluation features
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
    /// Scaler fit on `x_train` before scaling
    pub scaler: FittedScaler,
    pub encoders: Vec<CategoryEncoder>,
    /// Row numbers (in the input table) of the training partition
    pub train_indices: Vec<usize>,
    /// Row numbers (in the input table) of the evaluation partition
    pub test_indices: Vec<usize>,
    raw_test: Array2<f64>,
}

impl PreparedData {
    /// Training partition as a linfa dataset
    pub fn train_dataset(&self) -> Dataset<f64, usize, ndarray::Ix1> {
        Dataset::new(self.x_train.clone(), self.y_train.clone())
            .with_feature_names(self.feature_names.clone())
    }

    /// Evaluation features scaled with `scaler` instead of the one fit in this run
    pub fn test_features_with(&self, scaler: &FittedScaler) -> crate::Result<Array2<f64>> {
        if *scaler == self.scaler {
            return Ok(self.x_test.clone());
        }
        scaler.transform(&self.feature_names, &self.raw_test)
    }

    /// Evaluation features before scaling
    pub fn raw_test_features(&self) -> &Array2<f64> {
        &self.raw_test
    }

    pub fn n_rows(&self) -> usize {
        self.train_indices.len() + self.test_indices.len()
    }
}

/// Read a CSV file with a header row into a DataFrame
pub fn load_dataset(path: &Path) -> crate::Result<DataFrame> {
    if !path.is_file() {
        return Err(PipelineError::NotFound(path.to_path_buf()));
    }

    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .finish()?
        .collect()?;

    debug!(path = %path.display(), rows = df.height(), cols = df.width(), "dataset loaded");
    Ok(df)
}

/// Load the configured dataset and prepare train/test features
pub fn load_and_prepare(config: &PipelineConfig) -> crate::Result<PreparedData> {
    let df = load_dataset(&config.data_path)?;
    prepare_data(&df, &config.schema, config.test_size, config.seed)
}

/// Drop identifiers, split off the target, one-hot encode categoricals,
/// partition with a seeded permutation and standardize numeric columns
pub fn prepare_data(
    df: &DataFrame,
    schema: &FeatureSchema,
    test_size: f64,
    seed: u64,
) -> crate::Result<PreparedData> {
    let n_rows = df.height();
    if n_rows == 0 {
        return Err(PipelineError::InvalidData("dataset has no rows".to_string()));
    }

    // Identifier columns must exist even though they are discarded
    for id in &schema.id_columns {
        require_column(df, id)?;
    }
    let targets = target_column(df, &schema.target)?;

    let mut numeric_names = Vec::new();
    let mut numeric_values = Vec::new();
    for name in df.get_column_names() {
        let name = name.to_string();
        if schema.id_columns.contains(&name)
            || schema.target == name
            || schema.categorical.contains(&name)
        {
            continue;
        }
        numeric_values.push(numeric_column(df, &name)?);
        numeric_names.push(name);
    }

    let mut encoders = Vec::with_capacity(schema.categorical.len());
    let mut categorical_values = Vec::with_capacity(schema.categorical.len());
    for name in &schema.categorical {
        let values = string_column(df, name)?;
        encoders.push(CategoryEncoder::fit(name, values.iter().map(String::as_str)));
        categorical_values.push(values);
    }

    let mut feature_names = numeric_names.clone();
    for encoder in &encoders {
        for indicator in encoder.indicator_names() {
            if feature_names.contains(&indicator) {
                return Err(PipelineError::SchemaMismatch(format!(
                    "indicator column '{indicator}' clashes with an existing feature name"
                )));
            }
            feature_names.push(indicator);
        }
    }
    if feature_names.is_empty() {
        return Err(PipelineError::SchemaMismatch(
            "no feature columns left after dropping identifiers and target".to_string(),
        ));
    }

    let mut flat = Vec::with_capacity(n_rows * feature_names.len());
    for row in 0..n_rows {
        flat.extend(numeric_values.iter().map(|col| col[row]));
        for (encoder, values) in encoders.iter().zip(&categorical_values) {
            flat.extend(encoder.encode(&values[row]));
        }
    }
    let features = Array2::from_shape_vec((n_rows, feature_names.len()), flat)
        .map_err(|e| PipelineError::InvalidData(format!("cannot build feature matrix: {e}")))?;

    let (train_indices, test_indices) = split_indices(n_rows, test_size, seed)?;

    let raw_train = features.select(ndarray::Axis(0), &train_indices);
    let raw_test = features.select(ndarray::Axis(0), &test_indices);
    let y_train = targets.select(ndarray::Axis(0), &train_indices);
    let y_test = targets.select(ndarray::Axis(0), &test_indices);

    let scaler = FittedScaler::fit(&feature_names, &numeric_names, &raw_train)?;
    let x_train = scaler.transform(&feature_names, &raw_train)?;
    let x_test = scaler.transform(&feature_names, &raw_test)?;

    info!(
        rows = n_rows,
        features = feature_names.len(),
        train = train_indices.len(),
        test = test_indices.len(),
        "data prepared"
    );

    Ok(PreparedData {
        feature_names,
        x_train,
        x_test,
        y_train,
        y_test,
        scaler,
        encoders,
        train_indices,
        test_indices,
        raw_test,
    })
}

/// Seeded shuffle of `0..n_rows`; the first `ceil(n_rows * test_size)` indices
/// form the evaluation partition
pub fn split_indices(
    n_rows: usize,
    test_size: f64,
    seed: u64,
) -> crate::Result<(Vec<usize>, Vec<usize>)> {
    let n_test = (n_rows as f64 * test_size).ceil() as usize;
    let n_train = n_rows.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(PipelineError::InvalidData(format!(
            "cannot split {n_rows} rows with test_size {test_size}: one partition would be empty"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut permutation: Vec<usize> = (0..n_rows).collect();
    permutation.shuffle(&mut rng);

    let train = permutation.split_off(n_test);
    Ok((train, permutation))
}

fn require_column<'a>(df: &'a DataFrame, name: &str) -> crate::Result<&'a Column> {
    df.column(name)
        .map_err(|_| PipelineError::SchemaMismatch(format!("missing column '{name}'")))
}

fn numeric_column(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let series = require_column(df, name)?.as_materialized_series();
    let cast = series.strict_cast(&DataType::Float64).map_err(|_| {
        PipelineError::SchemaMismatch(format!(
            "column '{name}' must be numeric, found {}",
            series.dtype()
        ))
    })?;
    let values = cast.f64()?;
    if values.null_count() > 0 {
        return Err(PipelineError::SchemaMismatch(format!(
            "column '{name}' has {} missing values",
            values.null_count()
        )));
    }
    Ok(values.into_no_null_iter().collect())
}

fn string_column(df: &DataFrame, name: &str) -> crate::Result<Vec<String>> {
    let series = require_column(df, name)?.as_materialized_series();
    let cast = series.cast(&DataType::String)?;
    let values = cast.str()?;
    values
        .into_iter()
        .map(|v| {
            v.map(str::to_string).ok_or_else(|| {
                PipelineError::SchemaMismatch(format!("categorical column '{name}' has missing values"))
            })
        })
        .collect()
}

fn target_column(df: &DataFrame, name: &str) -> crate::Result<Array1<usize>> {
    let values = numeric_column(df, name)?;
    values
        .into_iter()
        .map(|v| {
            if v >= 0.0 && v.fract() == 0.0 {
                Ok(v as usize)
            } else {
                Err(PipelineError::SchemaMismatch(format!(
                    "target column '{name}' must hold non-negative integer labels, found {v}"
                )))
            }
        })
        .collect()
}
