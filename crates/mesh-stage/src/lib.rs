//! Two-stage training control for mesh-based reconstruction.
//!
//! A reconstruction run is split in two:
//!
//! 1. **Geometry**: only SDF and deformation parameters are optimized
//!    against the silhouette mask plus the renderer's eikonal term and
//!    optional mesh regularizers. Every checkpoint publishes the current
//!    surface as a mesh artifact.
//! 2. **Appearance**: the published mesh is loaded as fixed geometry and
//!    every parameter is optimized against coarse/fine RGB reconstruction,
//!    plus material smoothness when the renderer exposes materials.
//!
//! The stages are separate invocations linked only by the artifact on disk.
//! Starting stage 2 without it (and without `use_sdf`) fails with
//! [`StageError::MissingArtifact`] before any loss is computed.
//!
//! # Example
//!
//! ```no_run
//! use mesh_stage::{Renderer, StageConfig, TrainingController};
//!
//! fn run<R: Renderer>(renderer: R) -> mesh_stage::StageResult<()> {
//!     let config = StageConfig::from_file("stage.toml".as_ref())?;
//!     let mut controller = TrainingController::new(config, renderer)?;
//!     let saved = controller.save_checkpoint(0)?;
//!     println!("checkpoint at {}", saved.state_path.display());
//!     Ok(())
//! }
//! ```
//!
//! The renderer is supplied by the caller through the [`Renderer`] trait;
//! this crate performs no rendering itself.

pub mod artifact;
pub mod checkpoint;
pub mod config;
pub mod controller;
mod error;
pub mod loss;
pub mod renderer;

pub use artifact::{
    ArtifactManifest, LoadedArtifact, MANIFEST_FILE, MeshArtifactStore, content_fingerprint,
};
pub use checkpoint::{
    CheckpointStore, LoadReport, PARAMETER_STATE_VERSION, ParameterState, apply_partial,
};
pub use config::{LossConfig, MaterialConfig, RgbCriterion, Stage, StageConfig, geometry_key};
pub use controller::{SavedCheckpoint, TrainingController, View, VisReport, sample_pixels};
pub use error::{StageError, StageErrorCode, StageRecoverySuggestion, StageResult};
pub use loss::{LossBreakdown, l1, mse, psnr};
pub use renderer::{MaskRender, MaterialBuffers, Ray, RenderOutput, RenderPass, Renderer};
