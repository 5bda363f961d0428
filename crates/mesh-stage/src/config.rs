//! Stage configuration.
//!
//! A [`StageConfig`] is read from TOML and validated before any renderer or
//! loss work happens. Every section except `run_name` is optional:
//!
//! ```toml
//! run_name = "bunny_appearance"
//! stage = 2
//! use_sdf = false
//! checkpoint_root = "checkpoints"
//! geometry_root = "data/learned_geo"
//! ray_batch_size = 128
//!
//! [loss]
//! lambda_coarse = 1.0
//! lambda_fine = 1.0
//! rgb = "mse"
//! rgb_fine = "l1"
//!
//! [regularizer]
//! edge_length = 0.0
//! laplacian_smooth = 0.1
//! laplacian_const = 0.0
//! normal_consistency = 0.01
//!
//! [material]
//! kd = 0.25
//! ks = 0.1
//! nrm = 0.0
//! std = 0.01
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use mesh_regularize::{ImageGradParams, MaterialSmoothnessWeights, MeshError, RegularizerWeights};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StageError, StageResult};

/// Which half of the pipeline a run optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stage {
    /// Stage 1: SDF and deformation parameters against the silhouette mask.
    Geometry,
    /// Stage 2: every network parameter against RGB, on fixed geometry.
    Appearance,
}

impl Stage {
    pub fn number(&self) -> u8 {
        match self {
            Stage::Geometry => 1,
            Stage::Appearance => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Geometry => "geometry",
            Stage::Appearance => "appearance",
        }
    }

    /// Whether the optimizer updates the named renderer parameter in this
    /// stage. Geometry trains only SDF and deformation parameters.
    pub fn trains_parameter(&self, name: &str) -> bool {
        match self {
            Stage::Geometry => name.contains("sdf") || name.contains("deform"),
            Stage::Appearance => true,
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = StageError;

    fn try_from(stage: u8) -> Result<Self, Self::Error> {
        match stage {
            1 => Ok(Stage::Geometry),
            2 => Ok(Stage::Appearance),
            _ => Err(StageError::InvalidStage { stage }),
        }
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> u8 {
        stage.number()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// Per-ray RGB reconstruction criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RgbCriterion {
    #[default]
    Mse,
    L1,
}

/// RGB loss settings for stage 2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub lambda_coarse: f64,
    pub lambda_fine: f64,
    /// Coarse criterion, also used for the fine pass unless `rgb_fine` is set.
    pub rgb: RgbCriterion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_fine: Option<RgbCriterion>,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            lambda_coarse: 1.0,
            lambda_fine: 1.0,
            rgb: RgbCriterion::Mse,
            rgb_fine: None,
        }
    }
}

impl LossConfig {
    pub fn coarse_criterion(&self) -> RgbCriterion {
        self.rgb
    }

    pub fn fine_criterion(&self) -> RgbCriterion {
        self.rgb_fine.unwrap_or(self.rgb)
    }
}

/// Stage-2 material smoothness settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialConfig {
    #[serde(flatten)]
    pub weights: MaterialSmoothnessWeights,
    #[serde(flatten)]
    pub image_grad: ImageGradParams,
}

/// Everything a training stage needs besides the renderer itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Run identifier; see [`geometry_key`] for how stage 2 finds its mesh.
    pub run_name: String,
    #[serde(default = "default_stage")]
    pub stage: Stage,
    /// Render geometry by sphere tracing the SDF instead of loading the
    /// stage-1 mesh.
    #[serde(default)]
    pub use_sdf: bool,
    #[serde(default = "default_checkpoint_root")]
    pub checkpoint_root: PathBuf,
    #[serde(default = "default_geometry_root")]
    pub geometry_root: PathBuf,
    #[serde(default = "default_ray_batch_size")]
    pub ray_batch_size: usize,
    #[serde(default)]
    pub loss: LossConfig,
    /// Stage-1 mesh regularizers, all off unless configured. Fields left out
    /// of a present `[regularizer]` table default to weight one.
    #[serde(default = "RegularizerWeights::none")]
    pub regularizer: RegularizerWeights,
    #[serde(default)]
    pub material: MaterialConfig,
}

fn default_stage() -> Stage {
    Stage::Geometry
}

fn default_checkpoint_root() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_geometry_root() -> PathBuf {
    PathBuf::from("data/learned_geo")
}

fn default_ray_batch_size() -> usize {
    128
}

/// Geometry key of a run: its name up to the first `_`.
///
/// An appearance run named `bunny_appearance` consumes the mesh exported
/// by the geometry run `bunny`.
pub fn geometry_key(run_name: &str) -> &str {
    run_name.split_once('_').map_or(run_name, |(key, _)| key)
}

impl StageConfig {
    /// Defaults for everything but the run name and stage.
    pub fn new(run_name: impl Into<String>, stage: Stage) -> Self {
        Self {
            run_name: run_name.into(),
            stage,
            use_sdf: false,
            checkpoint_root: default_checkpoint_root(),
            geometry_root: default_geometry_root(),
            ray_batch_size: default_ray_batch_size(),
            loss: LossConfig::default(),
            regularizer: RegularizerWeights::none(),
            material: MaterialConfig::default(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> StageResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StageError::ConfigParse {
            path: None,
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> StageResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StageError::ConfigParse {
            path: Some(path.to_path_buf()),
            details: format!("{}: {}", path.display(), e),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| StageError::ConfigParse {
            path: Some(path.to_path_buf()),
            details: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        debug!(path = %path.display(), run = %config.run_name, stage = %config.stage, "Loaded stage config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> StageResult<String> {
        toml::to_string_pretty(self).map_err(|e| StageError::ConfigParse {
            path: None,
            details: e.to_string(),
        })
    }

    pub fn to_json_string(&self) -> StageResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StageError::ConfigParse {
            path: None,
            details: e.to_string(),
        })
    }

    /// Geometry key of this run.
    pub fn geometry_key(&self) -> &str {
        geometry_key(&self.run_name)
    }

    /// Location of the persisted renderer parameters.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_root.join(&self.run_name).join("_renderer")
    }

    /// Whether stage 2 must load the stage-1 mesh artifact.
    pub fn requires_artifact(&self) -> bool {
        self.stage == Stage::Appearance && !self.use_sdf
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> StageResult<()> {
        if self.run_name.is_empty() {
            return Err(StageError::invalid_config("run_name", "must not be empty"));
        }
        if self.run_name.contains(['/', '\\']) || self.run_name == "." || self.run_name == ".." {
            return Err(StageError::invalid_config(
                "run_name",
                format!("`{}` is not a plain file name", self.run_name),
            ));
        }
        if self.geometry_key().is_empty() {
            return Err(StageError::invalid_config(
                "run_name",
                format!("`{}` has an empty geometry key", self.run_name),
            ));
        }
        if self.ray_batch_size == 0 {
            return Err(StageError::invalid_config(
                "ray_batch_size",
                "must be at least 1",
            ));
        }
        for (field, value) in [
            ("loss.lambda_coarse", self.loss.lambda_coarse),
            ("loss.lambda_fine", self.loss.lambda_fine),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(StageError::invalid_config(
                    field,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }

        self.regularizer
            .validate()
            .map_err(|e| config_error("regularizer", e))?;
        self.material
            .weights
            .validate()
            .map_err(|e| config_error("material", e))?;
        self.material
            .image_grad
            .validate()
            .map_err(|e| config_error("material", e))?;
        Ok(())
    }
}

fn config_error(section: &str, err: MeshError) -> StageError {
    match err {
        MeshError::InvalidParameter { name, details } => {
            StageError::invalid_config(format!("{}.{}", section, name), details)
        }
        other => StageError::Mesh(other),
    }
}
