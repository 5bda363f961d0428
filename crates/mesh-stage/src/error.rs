//! Error types for stage orchestration with rich diagnostics.
//!
//! Configuration and hand-off errors are fatal and raised before any loss
//! work, naming the stage, run or path involved. Numerical degeneracies are
//! handled inside the regularizers and never surface here.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Machine-readable error codes for stage operations.
///
/// Codes follow the pattern `STAGE-XXXX` where:
/// - 1xxx = Configuration errors
/// - 2xxx = Artifact hand-off errors
/// - 3xxx = Renderer and checkpoint errors
/// - 4xxx = Mesh errors passed through from `mesh-regularize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageErrorCode {
    /// STAGE-1001: Stage number is not 1 or 2
    InvalidStage = 1001,
    /// STAGE-1002: A configuration value is out of range
    InvalidConfig = 1002,
    /// STAGE-1003: Configuration file could not be read or parsed
    ConfigParse = 1003,

    /// STAGE-2001: Stage 2 needs a stage-1 mesh artifact that is absent
    MissingArtifact = 2001,
    /// STAGE-2002: Artifact on disk disagrees with its manifest
    ArtifactMismatch = 2002,
    /// STAGE-2003: Manifest could not be parsed
    InvalidManifest = 2003,
    /// STAGE-2004: Artifact or manifest could not be written
    ArtifactWrite = 2004,

    /// STAGE-3001: Renderer returned output of the wrong shape
    RenderOutput = 3001,
    /// STAGE-3002: Checkpoint could not be read or written
    CheckpointIo = 3002,
    /// STAGE-3003: Checkpoint blob is malformed
    CheckpointFormat = 3003,

    /// STAGE-4001: Mesh operation failed
    Mesh = 4001,
}

impl StageErrorCode {
    /// Returns the error code as a string in the format `STAGE-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageErrorCode::InvalidStage => "STAGE-1001",
            StageErrorCode::InvalidConfig => "STAGE-1002",
            StageErrorCode::ConfigParse => "STAGE-1003",
            StageErrorCode::MissingArtifact => "STAGE-2001",
            StageErrorCode::ArtifactMismatch => "STAGE-2002",
            StageErrorCode::InvalidManifest => "STAGE-2003",
            StageErrorCode::ArtifactWrite => "STAGE-2004",
            StageErrorCode::RenderOutput => "STAGE-3001",
            StageErrorCode::CheckpointIo => "STAGE-3002",
            StageErrorCode::CheckpointFormat => "STAGE-3003",
            StageErrorCode::Mesh => "STAGE-4001",
        }
    }
}

impl std::fmt::Display for StageErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for stage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRecoverySuggestion {
    /// Run stage 1 for this geometry first.
    RunGeometryStage { geometry_key: String },
    /// Fix the named configuration field.
    FixConfig { field: String },
    /// Re-export the stage-1 artifact.
    ReexportArtifact,
    /// Check the renderer implementation.
    CheckRenderer,
    /// Delete or restore the checkpoint file.
    ResetCheckpoint { path: PathBuf },
    /// No specific suggestion.
    None,
}

impl std::fmt::Display for StageRecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageRecoverySuggestion::RunGeometryStage { geometry_key } => write!(
                f,
                "Run stage 1 with run name `{}` and save a checkpoint, or enable use_sdf",
                geometry_key
            ),
            StageRecoverySuggestion::FixConfig { field } => {
                write!(f, "Correct `{}` in the stage configuration", field)
            }
            StageRecoverySuggestion::ReexportArtifact => {
                write!(f, "Re-run stage 1 checkpointing to re-export the mesh artifact")
            }
            StageRecoverySuggestion::CheckRenderer => write!(
                f,
                "The renderer must return one value per sampled ray and one mask value per pixel"
            ),
            StageRecoverySuggestion::ResetCheckpoint { path } => write!(
                f,
                "Remove or restore {} to start from fresh parameters",
                path.display()
            ),
            StageRecoverySuggestion::None => write!(f, "No specific suggestion available"),
        }
    }
}

/// Errors that can occur while configuring or running a training stage.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// Stage number outside 1..=2.
    #[error("invalid stage {stage}: expected 1 (geometry) or 2 (appearance)")]
    #[diagnostic(
        code(stage::config::invalid_stage),
        help("Set `stage = 1` to optimize geometry or `stage = 2` to optimize appearance.")
    )]
    InvalidStage { stage: u8 },

    /// Configuration value out of range.
    #[error("invalid configuration `{field}`: {details}")]
    #[diagnostic(code(stage::config::invalid))]
    InvalidConfig { field: String, details: String },

    /// Configuration file unreadable or malformed.
    #[error("failed to parse stage configuration: {details}")]
    #[diagnostic(
        code(stage::config::parse),
        help("Configuration is TOML; see `StageConfig` for the accepted fields.")
    )]
    ConfigParse {
        path: Option<PathBuf>,
        details: String,
    },

    /// Stage-1 artifact required but not found.
    #[error("no stage-1 mesh artifact for run `{run}` at {path:?}")]
    #[diagnostic(
        code(stage::artifact::missing),
        help("Stage 2 without use_sdf loads the mesh exported by stage 1. Run stage 1 first.")
    )]
    MissingArtifact { run: String, path: PathBuf },

    /// Artifact contents disagree with the manifest.
    #[error("mesh artifact for run `{run}` does not match its manifest: {details}")]
    #[diagnostic(
        code(stage::artifact::mismatch),
        help("The mesh file was modified after export. Re-export it from stage 1.")
    )]
    ArtifactMismatch { run: String, details: String },

    /// Manifest unreadable.
    #[error("invalid artifact manifest {path:?}: {details}")]
    #[diagnostic(code(stage::artifact::manifest))]
    InvalidManifest { path: PathBuf, details: String },

    /// Artifact or manifest write failed.
    #[error("failed to write artifact {path:?}: {source}")]
    #[diagnostic(
        code(stage::artifact::write),
        help("Check that the geometry root exists and is writable.")
    )]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Renderer output has the wrong shape.
    #[error("renderer returned malformed output: {details}")]
    #[diagnostic(code(stage::render::output))]
    RenderOutput { details: String },

    /// Checkpoint file could not be read or written.
    #[error("checkpoint I/O failed for {path:?}: {source}")]
    #[diagnostic(code(stage::checkpoint::io))]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint blob malformed.
    #[error("malformed checkpoint {path:?}: {details}")]
    #[diagnostic(
        code(stage::checkpoint::format),
        help("The blob was written by an incompatible version or truncated.")
    )]
    CheckpointFormat { path: PathBuf, details: String },

    /// Underlying mesh error.
    #[error("mesh operation failed: {0}")]
    #[diagnostic(code(stage::mesh::error))]
    Mesh(#[from] mesh_regularize::MeshError),
}

impl StageError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> StageErrorCode {
        match self {
            StageError::InvalidStage { .. } => StageErrorCode::InvalidStage,
            StageError::InvalidConfig { .. } => StageErrorCode::InvalidConfig,
            StageError::ConfigParse { .. } => StageErrorCode::ConfigParse,
            StageError::MissingArtifact { .. } => StageErrorCode::MissingArtifact,
            StageError::ArtifactMismatch { .. } => StageErrorCode::ArtifactMismatch,
            StageError::InvalidManifest { .. } => StageErrorCode::InvalidManifest,
            StageError::ArtifactWrite { .. } => StageErrorCode::ArtifactWrite,
            StageError::RenderOutput { .. } => StageErrorCode::RenderOutput,
            StageError::CheckpointIo { .. } => StageErrorCode::CheckpointIo,
            StageError::CheckpointFormat { .. } => StageErrorCode::CheckpointFormat,
            StageError::Mesh(_) => StageErrorCode::Mesh,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> StageRecoverySuggestion {
        match self {
            StageError::InvalidStage { .. } => StageRecoverySuggestion::FixConfig {
                field: "stage".into(),
            },
            StageError::InvalidConfig { field, .. } => StageRecoverySuggestion::FixConfig {
                field: field.clone(),
            },
            StageError::ConfigParse { .. } => StageRecoverySuggestion::None,
            StageError::MissingArtifact { run, .. } => StageRecoverySuggestion::RunGeometryStage {
                geometry_key: crate::config::geometry_key(run).to_string(),
            },
            StageError::ArtifactMismatch { .. } | StageError::InvalidManifest { .. } => {
                StageRecoverySuggestion::ReexportArtifact
            }
            StageError::ArtifactWrite { .. } => StageRecoverySuggestion::None,
            StageError::RenderOutput { .. } => StageRecoverySuggestion::CheckRenderer,
            StageError::CheckpointIo { path, .. } | StageError::CheckpointFormat { path, .. } => {
                StageRecoverySuggestion::ResetCheckpoint { path: path.clone() }
            }
            StageError::Mesh(_) => StageRecoverySuggestion::None,
        }
    }

    // Constructor helpers

    /// Create an invalid config error.
    pub fn invalid_config(field: impl Into<String>, details: impl Into<String>) -> Self {
        StageError::InvalidConfig {
            field: field.into(),
            details: details.into(),
        }
    }

    /// Create a render output error.
    pub fn render_output(details: impl Into<String>) -> Self {
        StageError::RenderOutput {
            details: details.into(),
        }
    }

    /// Create an artifact mismatch error.
    pub fn artifact_mismatch(run: impl Into<String>, details: impl Into<String>) -> Self {
        StageError::ArtifactMismatch {
            run: run.into(),
            details: details.into(),
        }
    }
}
