//! Error type shared by every pipeline stage

use std::path::{Path, PathBuf};

/// Everything that can go wrong between reading the CSV and writing the model
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input dataset, artifact or target directory does not exist
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Expected column is absent or has the wrong type
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Row or column counts disagree between two stages
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    /// Persisted artifact is unreadable, corrupt or from another format version
    #[error("cannot read artifact {}: {reason}", path.display())]
    Serialization { path: PathBuf, reason: String },

    /// Invalid combination of requested steps
    #[error("invalid usage: {0}")]
    Usage(String),

    /// Data is well-formed but unusable (empty partition, single class, ...)
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Out-of-range or unreadable configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Linfa(#[from] linfa::Error),
}

impl PipelineError {
    /// Wrap an I/O error, turning `ErrorKind::NotFound` into [`PipelineError::NotFound`]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn dimension(context: impl Into<String>, expected: usize, got: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            got,
        }
    }

    pub fn serialization(path: &Path, reason: impl ToString) -> Self {
        Self::Serialization {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = PipelineError::io(
            Path::new("models/scaler.bin"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, PipelineError::NotFound(ref p) if p == Path::new("models/scaler.bin")));
        assert!(err.to_string().contains("models/scaler.bin"));
    }

    #[test]
    fn test_io_other_kind_is_kept() {
        let err = PipelineError::io(
            Path::new("out.bin"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
