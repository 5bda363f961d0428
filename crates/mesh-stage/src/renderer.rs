//! Renderer boundary.
//!
//! The controller never looks inside the renderer: it hands over sampled
//! rays and gets back masks, colours and sample weights. Scene sampling,
//! volumetric integration and the networks themselves live behind
//! [`Renderer`].

use mesh_regularize::{Mesh, RenderBuffer};
use nalgebra::{Matrix4, Point3, Vector3};

use crate::checkpoint::ParameterState;
use crate::error::StageResult;

/// A camera ray with its sampling interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
    pub near: f32,
    pub far: f32,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>, near: f32, far: f32) -> Self {
        Self {
            origin,
            direction,
            near,
            far,
        }
    }

    /// Point at parameter `t` along the ray.
    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }
}

/// Stage-1 output: the full-frame silhouette and the SDF's eikonal penalty.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskRender {
    /// Row-major `height * width` coverage in `[0, 1]`.
    pub mask: Vec<f32>,
    pub eikonal_loss: f64,
}

/// One sampling pass over a ray batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPass {
    /// Composited colour per ray.
    pub rgb: Vec<[f32; 3]>,
    /// Per-ray sample weights; empty unless weights were requested.
    pub weights: Vec<Vec<f32>>,
}

impl RenderPass {
    /// Accumulated opacity per ray (sum of its sample weights).
    pub fn alpha(&self) -> Vec<f32> {
        self.weights.iter().map(|w| w.iter().sum()).collect()
    }

    pub fn ray_count(&self) -> usize {
        self.rgb.len()
    }
}

/// Material texture buffers, each with alpha as the last channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialBuffers {
    /// Albedo, at least RGB + alpha.
    pub kd: RenderBuffer,
    /// Specular parameters.
    pub ks: RenderBuffer,
    /// Normal map.
    pub nrm: RenderBuffer,
}

/// Stage-2 output.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub coarse: RenderPass,
    /// `None` when the renderer runs a single pass.
    pub fine: Option<RenderPass>,
    /// Present when the renderer exposes surface materials.
    pub material: Option<MaterialBuffers>,
}

impl RenderOutput {
    pub fn coarse_only(coarse: RenderPass) -> Self {
        Self {
            coarse,
            fine: None,
            material: None,
        }
    }

    /// The fine pass when it produced any samples.
    pub fn fine_samples(&self) -> Option<&RenderPass> {
        self.fine.as_ref().filter(|pass| !pass.rgb.is_empty())
    }

    /// The pass used for reporting: fine when available, else coarse.
    pub fn best_pass(&self) -> &RenderPass {
        self.fine_samples().unwrap_or(&self.coarse)
    }
}

/// Differentiable renderer driven by the training controller.
pub trait Renderer {
    /// Render the silhouette of the current geometry for a `height * width`
    /// frame seen through `mvp`.
    fn render_mask(
        &mut self,
        rays: &[Ray],
        mvp: &Matrix4<f32>,
        height: usize,
        width: usize,
        global_step: u64,
    ) -> StageResult<MaskRender>;

    /// Render colours (and optionally sample weights) along `rays`.
    fn render(&mut self, rays: &[Ray], want_weights: bool) -> StageResult<RenderOutput>;

    /// Extract the current surface as a triangle mesh.
    fn export_mesh(&mut self, global_step: u64) -> StageResult<Mesh>;

    /// Fix the geometry to `mesh` for appearance training.
    fn init_from_mesh(&mut self, mesh: &Mesh) -> StageResult<()>;

    /// Current surface for mesh regularization, when the renderer keeps an
    /// explicit one.
    fn surface_mesh(&self) -> Option<Mesh> {
        None
    }

    /// Receive the gradient of the weighted mesh regularizers with respect
    /// to each vertex of [`surface_mesh`](Self::surface_mesh).
    fn accumulate_mesh_gradient(&mut self, _gradient: &[Vector3<f64>]) {}

    /// Snapshot of every named parameter.
    fn state_dict(&self) -> ParameterState;

    /// Replace parameters with `state`. Only called with a state derived
    /// from [`state_dict`](Self::state_dict), so every key is known.
    fn load_state_dict(&mut self, state: ParameterState);

    /// Switch between training and evaluation behaviour.
    fn set_training(&mut self, training: bool);

    /// Advance internal schedules after a batch of `batch_size` objects.
    fn sched_step(&mut self, _batch_size: usize) {}
}
