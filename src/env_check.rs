//! Pre-flight checks run by `--test-env`

use crate::config::PipelineConfig;
use crate::data::load_dataset;
use crate::error::PipelineError;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Outcome of a successful environment check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvReport {
    pub version: &'static str,
    pub data_path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub model_dir: PathBuf,
    /// Save needs this directory to exist; its absence is only reported
    pub model_dir_exists: bool,
}

/// Verify the dataset is present and carries every column the pipeline
/// references, and report whether the model directory exists
pub fn check_environment(config: &PipelineConfig) -> crate::Result<EnvReport> {
    let df = load_dataset(&config.data_path)?;

    let present: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let missing: Vec<&str> = config
        .schema
        .referenced_columns()
        .filter(|name| !present.iter().any(|p| p == *name))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SchemaMismatch(format!(
            "{} is missing columns: {}",
            config.data_path.display(),
            missing.join(", ")
        )));
    }

    let model_dir_exists = config.model_dir.is_dir();
    if !model_dir_exists {
        warn!(dir = %config.model_dir.display(), "model directory does not exist; saving will fail");
    }

    let report = EnvReport {
        version: env!("CARGO_PKG_VERSION"),
        data_path: config.data_path.clone(),
        rows: df.height(),
        columns: df.width(),
        model_dir: config.model_dir.clone(),
        model_dir_exists,
    };
    info!(rows = report.rows, columns = report.columns, "environment check passed");
    Ok(report)
}

impl fmt::Display for EnvReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "churnforge {}", self.version)?;
        writeln!(
            f,
            "  Data file: {} ({} rows, {} columns) (OK)",
            self.data_path.display(),
            self.rows,
            self.columns
        )?;
        let status = if self.model_dir_exists { "OK" } else { "missing" };
        write!(f, "  Model directory: {} ({status})", self.model_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn config_for(data: &std::path::Path, model_dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            data_path: data.to_path_buf(),
            model_dir: model_dir.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_environment_ok() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "RowNumber,CustomerId,Surname,Geography,Gender,Age,Exited").unwrap();
        writeln!(file, "1,15634602,Hargrave,France,Female,42,1").unwrap();
        let dir = tempdir().unwrap();

        let report = check_environment(&config_for(file.path(), dir.path())).unwrap();
        assert_eq!(report.rows, 1);
        assert_eq!(report.columns, 7);
        assert!(report.model_dir_exists);
        assert!(report.to_string().contains("(OK)"));
    }

    #[test]
    fn test_environment_missing_data() {
        let dir = tempdir().unwrap();
        let config = config_for(&dir.path().join("Churn_Modelling.csv"), dir.path());
        assert!(matches!(
            check_environment(&config),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn test_environment_missing_columns() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "RowNumber,CustomerId,Age,Exited").unwrap();
        writeln!(file, "1,15634602,42,1").unwrap();
        let dir = tempdir().unwrap();

        let err = check_environment(&config_for(file.path(), dir.path())).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Surname"));
        assert!(message.contains("Geography"));
        assert!(message.contains("Gender"));
    }

    #[test]
    fn test_environment_reports_missing_model_dir() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "RowNumber,CustomerId,Surname,Geography,Gender,Exited").unwrap();
        writeln!(file, "1,2,Hill,Spain,Male,0").unwrap();
        let dir = tempdir().unwrap();

        let report = check_environment(&config_for(file.path(), &dir.path().join("models"))).unwrap();
        assert!(!report.model_dir_exists);
    }
}
