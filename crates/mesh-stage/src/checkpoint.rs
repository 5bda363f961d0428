//! Renderer parameter persistence.
//!
//! Parameters are stored as one JSON document per run. Loading is
//! tolerant: [`apply_partial`] copies whatever keys match and reports the
//! rest instead of failing, so a renderer that gained or lost parameters
//! between runs still resumes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StageError, StageResult};

/// Current on-disk format version.
pub const PARAMETER_STATE_VERSION: u32 = 1;

/// Named parameter tensors, flattened to `f32` vectors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterState {
    pub version: u32,
    pub params: BTreeMap<String, Vec<f32>>,
}

impl ParameterState {
    pub fn new() -> Self {
        Self {
            version: PARAMETER_STATE_VERSION,
            params: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f32>) {
        self.params.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.params.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar values.
    pub fn scalar_count(&self) -> usize {
        self.params.values().map(Vec::len).sum()
    }
}

/// Outcome of a tolerant parameter load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LoadReport {
    /// Keys copied from the checkpoint.
    pub loaded: Vec<String>,
    /// Keys the renderer has but the checkpoint lacks; left untouched.
    pub missing: Vec<String>,
    /// Keys the checkpoint has but the renderer does not; ignored.
    pub unexpected: Vec<String>,
    /// Keys present on both sides with different lengths; left untouched.
    pub shape_mismatch: Vec<String>,
}

impl LoadReport {
    /// True when every renderer parameter was restored.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.shape_mismatch.is_empty()
    }
}

/// Copy every matching parameter from `source` into `target`.
///
/// Only keys already present in `target` with the same length are copied.
pub fn apply_partial(target: &mut ParameterState, source: &ParameterState) -> LoadReport {
    let mut report = LoadReport::default();

    for (name, values) in target.params.iter_mut() {
        match source.params.get(name) {
            Some(saved) if saved.len() == values.len() => {
                values.copy_from_slice(saved);
                report.loaded.push(name.clone());
            }
            Some(_) => report.shape_mismatch.push(name.clone()),
            None => report.missing.push(name.clone()),
        }
    }
    report.unexpected = source
        .params
        .keys()
        .filter(|name| !target.params.contains_key(*name))
        .cloned()
        .collect();

    report
}

/// File-backed store for one run's renderer parameters.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `state`, replacing any previous checkpoint atomically.
    pub fn save(&self, state: &ParameterState) -> StageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let blob = serde_json::to_vec(state).map_err(|e| StageError::CheckpointFormat {
            path: self.path.clone(),
            details: e.to_string(),
        })?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &blob).map_err(|source| self.io_error(source))?;
        fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;

        info!(
            path = %self.path.display(),
            params = state.len(),
            scalars = state.scalar_count(),
            "Saved renderer checkpoint"
        );
        Ok(())
    }

    /// Read the checkpoint; `Ok(None)` when none has been written yet.
    pub fn load(&self) -> StageResult<Option<ParameterState>> {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No renderer checkpoint");
                return Ok(None);
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let state: ParameterState =
            serde_json::from_slice(&blob).map_err(|e| StageError::CheckpointFormat {
                path: self.path.clone(),
                details: e.to_string(),
            })?;
        if state.version > PARAMETER_STATE_VERSION {
            return Err(StageError::CheckpointFormat {
                path: self.path.clone(),
                details: format!(
                    "format version {} is newer than supported version {}",
                    state.version, PARAMETER_STATE_VERSION
                ),
            });
        }
        Ok(Some(state))
    }

    /// Restore into `target` if a checkpoint exists.
    pub fn restore_into(&self, target: &mut ParameterState) -> StageResult<Option<LoadReport>> {
        let Some(saved) = self.load()? else {
            return Ok(None);
        };
        let report = apply_partial(target, &saved);
        if !report.is_complete() || !report.unexpected.is_empty() {
            warn!(
                path = %self.path.display(),
                missing = ?report.missing,
                unexpected = ?report.unexpected,
                shape_mismatch = ?report.shape_mismatch,
                "Partial checkpoint load"
            );
        }
        info!(
            path = %self.path.display(),
            loaded = report.loaded.len(),
            "Restored renderer checkpoint"
        );
        Ok(Some(report))
    }

    fn io_error(&self, source: std::io::Error) -> StageError {
        StageError::CheckpointIo {
            path: self.path.clone(),
            source,
        }
    }
}
