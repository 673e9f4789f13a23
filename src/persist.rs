//! Saving and loading the fitted model and scaler
//!
//! Both artifacts are bincode-encoded envelopes. A save writes each file to a
//! temporary sibling, syncs it and renames it into place, and stamps both files
//! with the same pairing id; loading refuses a model and a scaler that were not
//! written by the same save.

use crate::error::PipelineError;
use crate::model::LinearSvc;
use crate::scaler::FittedScaler;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

/// Leading bytes of every artifact
const MAGIC: [u8; 4] = *b"CHRN";
/// Bumped whenever the payload layout changes
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Model,
    Scaler,
}

/// Locations of the two artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub scaler: PathBuf,
}

impl ArtifactPaths {
    pub fn new(model: impl Into<PathBuf>, scaler: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            scaler: scaler.into(),
        }
    }
}

/// Metadata written in front of every payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    magic: [u8; 4],
    pub format_version: u32,
    pub kind: ArtifactKind,
    /// Shared by the model and scaler written in one save
    pub pair_id: Uuid,
    pub saved_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    header: ArtifactHeader,
    payload: T,
}

/// Model and scaler read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedArtifacts {
    pub model: LinearSvc,
    pub scaler: FittedScaler,
    pub header: ArtifactHeader,
}

/// Write `model` and `scaler`, replacing existing files. Parent directories
/// must already exist.
pub fn save(model: &LinearSvc, scaler: &FittedScaler, paths: &ArtifactPaths) -> crate::Result<()> {
    let header = ArtifactHeader {
        magic: MAGIC,
        format_version: FORMAT_VERSION,
        kind: ArtifactKind::Model,
        pair_id: Uuid::new_v4(),
        saved_at: Utc::now(),
    };
    let scaler_header = ArtifactHeader {
        kind: ArtifactKind::Scaler,
        ..header.clone()
    };

    // Stage both files before touching either destination
    let staged_model = stage(&paths.model, &Envelope { header, payload: model })?;
    let staged_scaler = stage(
        &paths.scaler,
        &Envelope {
            header: scaler_header,
            payload: scaler,
        },
    )?;

    commit(staged_model, &paths.model)?;
    commit(staged_scaler, &paths.scaler)?;

    info!(
        model = %paths.model.display(),
        scaler = %paths.scaler.display(),
        "model and scaler saved"
    );
    Ok(())
}

/// Read both artifacts and check that they belong together
pub fn load(paths: &ArtifactPaths) -> crate::Result<LoadedArtifacts> {
    let (model_header, model) = read_artifact::<LinearSvc>(&paths.model, ArtifactKind::Model)?;
    let (scaler_header, scaler) =
        read_artifact::<FittedScaler>(&paths.scaler, ArtifactKind::Scaler)?;

    if model_header.pair_id != scaler_header.pair_id {
        return Err(PipelineError::serialization(
            &paths.scaler,
            format!(
                "scaler was saved separately from model {} (pair {} vs {})",
                paths.model.display(),
                scaler_header.pair_id,
                model_header.pair_id
            ),
        ));
    }

    info!(
        model = %paths.model.display(),
        scaler = %paths.scaler.display(),
        saved_at = %model_header.saved_at,
        "model and scaler loaded"
    );
    Ok(LoadedArtifacts {
        model,
        scaler,
        header: model_header,
    })
}

/// Serialize into a synced temporary file next to `dest`
fn stage<T: Serialize>(dest: &Path, envelope: &Envelope<T>) -> crate::Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(PipelineError::NotFound(dir.to_path_buf()));
    }

    let bytes = bincode::serialize(envelope)
        .map_err(|e| PipelineError::serialization(dest, format!("encoding failed: {e}")))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
    tmp.write_all(&bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| PipelineError::io(tmp.path(), e))?;
    debug!(dest = %dest.display(), bytes = bytes.len(), "artifact staged");
    Ok(tmp)
}

fn commit(staged: NamedTempFile, dest: &Path) -> crate::Result<()> {
    staged
        .persist(dest)
        .map(|_| ())
        .map_err(|e| PipelineError::io(dest, e.error))
}

fn read_artifact<T: DeserializeOwned>(
    path: &Path,
    expected: ArtifactKind,
) -> crate::Result<(ArtifactHeader, T)> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;

    // The header is decoded on its own first so that a version mismatch is
    // reported as such instead of as a garbled payload
    let header: ArtifactHeader = bincode::deserialize(&bytes)
        .map_err(|e| PipelineError::serialization(path, format!("unreadable header: {e}")))?;
    if header.magic != MAGIC {
        return Err(PipelineError::serialization(path, "not a churnforge artifact"));
    }
    if header.format_version != FORMAT_VERSION {
        return Err(PipelineError::serialization(
            path,
            format!(
                "format version {} is not supported (expected {FORMAT_VERSION})",
                header.format_version
            ),
        ));
    }
    if header.kind != expected {
        return Err(PipelineError::serialization(
            path,
            format!("expected a {expected:?} artifact, found {:?}", header.kind),
        ));
    }

    let envelope: Envelope<T> = bincode::deserialize(&bytes)
        .map_err(|e| PipelineError::serialization(path, format!("corrupt payload: {e}")))?;
    Ok((envelope.header, envelope.payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use linfa::prelude::*;
    use linfa::Dataset;
    use ndarray::array;
    use tempfile::tempdir;

    fn fitted_pair() -> (LinearSvc, FittedScaler) {
        let names = vec!["Age".to_string(), "Balance".to_string()];
        let raw = array![
            [25.0, 0.0],
            [31.0, 1200.0],
            [38.0, 300.0],
            [47.0, 90000.0],
            [52.0, 120000.0],
            [61.0, 80000.0]
        ];
        let scaler = FittedScaler::fit(&names, &names, &raw).unwrap();
        let scaled = scaler.transform(&names, &raw).unwrap();
        let dataset = Dataset::new(scaled, array![0, 0, 0, 1, 1, 1]).with_feature_names(names);
        let model = LinearSvc::params().fit(&dataset).unwrap();
        (model, scaler)
    }

    fn paths_in(dir: &Path) -> ArtifactPaths {
        ArtifactPaths::new(dir.join("linear_svc_model.bin"), dir.join("scaler.bin"))
    }

    #[test]
    fn test_round_trip_predicts_identically() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let (model, scaler) = fitted_pair();

        save(&model, &scaler, &paths).unwrap();
        let loaded = load(&paths).unwrap();

        assert_eq!(loaded.model, model);
        assert_eq!(loaded.scaler, scaler);
        assert_eq!(loaded.header.format_version, FORMAT_VERSION);

        let samples = array![[-1.0, 0.5], [0.3, -0.2], [1.5, 1.1]];
        assert_eq!(loaded.model.predict(&samples), model.predict(&samples));
    }

    #[test]
    fn test_save_overwrites_existing_files() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::write(&paths.model, b"stale").unwrap();
        fs::write(&paths.scaler, b"stale").unwrap();

        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &paths).unwrap();
        assert_eq!(load(&paths).unwrap().model, model);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let err = load(&paths).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(ref p) if *p == paths.model));
    }

    #[test]
    fn test_load_missing_scaler() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &paths).unwrap();
        fs::remove_file(&paths.scaler).unwrap();

        let err = load(&paths).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(ref p) if *p == paths.scaler));
    }

    #[test]
    fn test_load_corrupt_artifact() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &paths).unwrap();
        fs::write(&paths.model, b"definitely not bincode").unwrap();

        let err = load(&paths).unwrap_err();
        assert!(matches!(err, PipelineError::Serialization { ref path, .. } if *path == paths.model));
    }

    #[test]
    fn test_load_truncated_payload() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &paths).unwrap();

        let bytes = fs::read(&paths.model).unwrap();
        fs::write(&paths.model, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(
            load(&paths),
            Err(PipelineError::Serialization { .. })
        ));
    }

    #[test]
    fn test_load_rejects_other_format_version() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &paths).unwrap();

        let mut envelope: Envelope<LinearSvc> =
            bincode::deserialize(&fs::read(&paths.model).unwrap()).unwrap();
        envelope.header.format_version = FORMAT_VERSION + 1;
        fs::write(&paths.model, bincode::serialize(&envelope).unwrap()).unwrap();

        let err = load(&paths).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_load_rejects_swapped_files() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &paths).unwrap();

        let swapped = ArtifactPaths::new(paths.scaler.clone(), paths.model.clone());
        assert!(matches!(
            load(&swapped),
            Err(PipelineError::Serialization { .. })
        ));
    }

    #[test]
    fn test_load_rejects_mixed_saves() {
        let dir = tempdir().unwrap();
        let first = paths_in(dir.path());
        let (model, scaler) = fitted_pair();
        save(&model, &scaler, &first).unwrap();

        // a second save whose scaler replaces the first one's, as if a save
        // had been interrupted between the two renames
        let second = ArtifactPaths::new(dir.path().join("other_model.bin"), first.scaler.clone());
        save(&model, &scaler, &second).unwrap();

        let err = load(&first).unwrap_err();
        assert!(err.to_string().contains("saved separately"));
    }

    #[test]
    fn test_save_requires_existing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("models");
        let paths = paths_in(&missing);
        let (model, scaler) = fitted_pair();

        let err = save(&model, &scaler, &paths).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(ref p) if *p == missing));
        assert!(!missing.exists());
    }
}
