//! Integration tests for the two-stage training controller.
//!
//! A scripted renderer stands in for the real one so that every loss can be
//! checked against hand-computed values.

use approx::assert_relative_eq;
use mesh_regularize::{Mesh, RegularizerWeights, RenderBuffer, Vertex};
use mesh_stage::{
    CheckpointStore, MaskRender, MaterialBuffers, ParameterState, Ray, RenderOutput, RenderPass,
    Renderer, RgbCriterion, Stage, StageConfig, StageError, StageResult, TrainingController, View,
};
use nalgebra::{Matrix4, Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::TempDir;

// =============================================================================
// Scripted renderer
// =============================================================================

#[derive(Debug, Clone)]
struct ScriptedRenderer {
    params: ParameterState,
    training: bool,
    mode_changes: Vec<bool>,
    mask_value: f32,
    eikonal: f64,
    coarse_rgb: [f32; 3],
    fine_rgb: Option<[f32; 3]>,
    material: Option<MaterialBuffers>,
    surface: Option<Mesh>,
    initialized_with: Option<Mesh>,
    gradient_calls: usize,
    sched_steps: Vec<usize>,
    fail_render: bool,
    empty_fine: bool,
    drop_ray: bool,
    weight_requests: Vec<bool>,
}

impl ScriptedRenderer {
    fn new() -> Self {
        Self {
            params: ParameterState::new()
                .with("sdf.weight", vec![0.0; 4])
                .with("deform.offsets", vec![0.0; 3])
                .with("color.weight", vec![0.0; 2]),
            training: false,
            mode_changes: Vec::new(),
            mask_value: 0.5,
            eikonal: 0.1,
            coarse_rgb: [0.75; 3],
            fine_rgb: None,
            material: None,
            surface: None,
            initialized_with: None,
            gradient_calls: 0,
            sched_steps: Vec::new(),
            fail_render: false,
            empty_fine: false,
            drop_ray: false,
            weight_requests: Vec::new(),
        }
    }

    fn pass(rgb: [f32; 3], rays: usize, want_weights: bool) -> RenderPass {
        RenderPass {
            rgb: vec![rgb; rays],
            weights: if want_weights {
                vec![vec![0.25, 0.25]; rays]
            } else {
                Vec::new()
            },
        }
    }
}

impl Renderer for ScriptedRenderer {
    fn render_mask(
        &mut self,
        _rays: &[Ray],
        _mvp: &Matrix4<f32>,
        height: usize,
        width: usize,
        _global_step: u64,
    ) -> StageResult<MaskRender> {
        Ok(MaskRender {
            mask: vec![self.mask_value; height * width],
            eikonal_loss: self.eikonal,
        })
    }

    fn render(&mut self, rays: &[Ray], want_weights: bool) -> StageResult<RenderOutput> {
        self.weight_requests.push(want_weights);
        if self.fail_render {
            return Err(StageError::render_output("scripted failure"));
        }
        let mut coarse = Self::pass(self.coarse_rgb, rays.len(), want_weights);
        if self.drop_ray {
            coarse.rgb.pop();
        }
        let fine = if self.empty_fine {
            Some(RenderPass::default())
        } else {
            self.fine_rgb
                .map(|rgb| Self::pass(rgb, rays.len(), want_weights))
        };
        Ok(RenderOutput {
            coarse,
            fine,
            material: self.material.clone(),
        })
    }

    fn export_mesh(&mut self, _global_step: u64) -> StageResult<Mesh> {
        Ok(self.surface.clone().unwrap_or_else(tetrahedron))
    }

    /// Mesh-derived parameters are overwritten, as a real renderer would
    /// rebuild its deformation grid from the mesh.
    fn init_from_mesh(&mut self, mesh: &Mesh) -> StageResult<()> {
        self.initialized_with = Some(mesh.clone());
        self.params
            .insert("deform.offsets", vec![mesh.vertex_count() as f32; 3]);
        Ok(())
    }

    fn surface_mesh(&self) -> Option<Mesh> {
        self.surface.clone()
    }

    fn accumulate_mesh_gradient(&mut self, gradient: &[Vector3<f64>]) {
        assert!(gradient.iter().all(|g| g.iter().all(|c| c.is_finite())));
        self.gradient_calls += 1;
    }

    fn state_dict(&self) -> ParameterState {
        self.params.clone()
    }

    fn load_state_dict(&mut self, state: ParameterState) {
        self.params = state;
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.mode_changes.push(training);
    }

    fn sched_step(&mut self, batch_size: usize) {
        self.sched_steps.push(batch_size);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn tetrahedron() -> Mesh {
    Mesh::from_positions(
        &[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 0.866, 0.0),
            Point3::new(0.5, 0.289, 0.816),
        ],
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
    )
}

fn config(dir: &TempDir, run: &str, stage: Stage) -> StageConfig {
    let mut config = StageConfig::new(run, stage);
    config.checkpoint_root = dir.path().join("checkpoints");
    config.geometry_root = dir.path().join("geo");
    config.ray_batch_size = 16;
    config
}

/// A 4x2 view with uniform colour and a full silhouette.
fn view(rgb: [f32; 3]) -> View {
    let rays = (0..8)
        .map(|i| Ray::new(Point3::new(i as f32, 0.0, 0.0), Vector3::z(), 0.1, 2.0))
        .collect();
    View::new(2, 4, vec![rgb; 8], vec![1.0; 8], rays, Matrix4::identity()).unwrap()
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

// =============================================================================
// Construction and hand-off
// =============================================================================

#[test]
fn test_appearance_without_artifact_is_fatal() {
    let dir = TempDir::new().unwrap();
    let result = TrainingController::new(
        config(&dir, "bunny_appearance", Stage::Appearance),
        ScriptedRenderer::new(),
    );

    match result {
        Err(StageError::MissingArtifact { run, path }) => {
            assert_eq!(run, "bunny_appearance");
            assert!(path.starts_with(dir.path().join("geo").join("bunny")));
        }
        Err(other) => panic!("Expected MissingArtifact, got {:?}", other),
        Ok(_) => panic!("Expected MissingArtifact, got a controller"),
    }
}

#[test]
fn test_appearance_with_sdf_needs_no_artifact() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, "bunny_appearance", Stage::Appearance);
    cfg.use_sdf = true;

    let controller = TrainingController::new(cfg, ScriptedRenderer::new()).unwrap();
    assert!(controller.geometry().is_none());
    assert!(controller.renderer().initialized_with.is_none());
    assert!(controller.renderer().training);
}

#[test]
fn test_invalid_config_is_rejected_before_renderer_use() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, "bunny", Stage::Geometry);
    cfg.loss.lambda_fine = -1.0;

    let err = TrainingController::new(cfg, ScriptedRenderer::new())
        .err()
        .unwrap();
    assert_eq!(err.code().as_str(), "STAGE-1002");
}

#[test]
fn test_geometry_checkpoint_feeds_appearance_stage() {
    let dir = TempDir::new().unwrap();

    let mut renderer = ScriptedRenderer::new();
    renderer.surface = Some(tetrahedron());
    let mut geometry =
        TrainingController::new(config(&dir, "bunny", Stage::Geometry), renderer).unwrap();
    let saved = geometry.save_checkpoint(500).unwrap();

    assert!(saved.state_path.ends_with("checkpoints/bunny/_renderer"));
    let manifest = saved.artifact.unwrap();
    assert_eq!(manifest.step, 500);
    assert_eq!(manifest.face_count, 4);

    let appearance = TrainingController::new(
        config(&dir, "bunny_appearance", Stage::Appearance),
        ScriptedRenderer::new(),
    )
    .unwrap();

    assert_eq!(appearance.geometry(), Some(&manifest));
    let mesh = appearance.renderer().initialized_with.as_ref().unwrap();
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.face_count(), 4);
    assert_eq!(mesh.positions(), tetrahedron().positions());
    // Different run name, so no checkpoint to restore
    assert!(appearance.restored().is_none());
}

#[test]
fn test_artifact_geometry_wins_over_checkpoint() {
    let dir = TempDir::new().unwrap();

    let mut renderer = ScriptedRenderer::new();
    renderer.surface = Some(tetrahedron());
    renderer.params.insert("sdf.weight", vec![1.0, 2.0, 3.0, 4.0]);
    renderer.params.insert("deform.offsets", vec![9.0; 3]);
    let mut geometry =
        TrainingController::new(config(&dir, "bunny", Stage::Geometry), renderer).unwrap();
    geometry.save_checkpoint(500).unwrap();

    // Same run name, so the stage-1 checkpoint is restored as well
    let appearance = TrainingController::new(
        config(&dir, "bunny", Stage::Appearance),
        ScriptedRenderer::new(),
    )
    .unwrap();

    assert!(appearance.restored().unwrap().is_complete());
    let params = &appearance.renderer().params;
    assert_eq!(params.get("sdf.weight"), Some(&[1.0, 2.0, 3.0, 4.0][..]));
    assert_eq!(params.get("deform.offsets"), Some(&[4.0, 4.0, 4.0][..]));
}

#[test]
fn test_failed_export_writes_no_checkpoint() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "bunny", Stage::Geometry);
    let state_path = cfg.checkpoint_path();

    let mut renderer = ScriptedRenderer::new();
    renderer.surface = Some(Mesh::new());
    let mut controller = TrainingController::new(cfg, renderer).unwrap();

    let err = controller.save_checkpoint(500).unwrap_err();
    assert!(matches!(err, StageError::Mesh(_)));
    assert!(!state_path.exists());
    assert!(!dir.path().join("geo").join("bunny").join("latest.json").exists());
}

#[test]
fn test_appearance_checkpoint_publishes_no_mesh() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, "bunny_appearance", Stage::Appearance);
    cfg.use_sdf = true;

    let mut controller = TrainingController::new(cfg, ScriptedRenderer::new()).unwrap();
    let saved = controller.save_checkpoint(10).unwrap();
    assert!(saved.artifact.is_none());
    assert!(saved.state_path.is_file());
}

#[test]
fn test_partial_checkpoint_restore() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "bunny", Stage::Geometry);

    let saved = ParameterState::new()
        .with("sdf.weight", vec![1.0, 2.0, 3.0, 4.0])
        .with("retired.head", vec![7.0]);
    CheckpointStore::new(cfg.checkpoint_path())
        .save(&saved)
        .unwrap();

    let controller = TrainingController::new(cfg, ScriptedRenderer::new()).unwrap();
    let report = controller.restored().unwrap();
    assert_eq!(report.loaded, vec!["sdf.weight"]);
    assert_eq!(report.missing, vec!["color.weight", "deform.offsets"]);
    assert_eq!(report.unexpected, vec!["retired.head"]);

    let params = &controller.renderer().params;
    assert_eq!(params.get("sdf.weight"), Some(&[1.0, 2.0, 3.0, 4.0][..]));
    assert_eq!(params.get("color.weight"), Some(&[0.0, 0.0][..]));
    assert!(params.get("retired.head").is_none());
}

#[test]
fn test_trainable_parameters_per_stage() {
    let dir = TempDir::new().unwrap();
    let geometry =
        TrainingController::new(config(&dir, "bunny", Stage::Geometry), ScriptedRenderer::new())
            .unwrap();
    assert_eq!(
        geometry.trainable_parameters(),
        vec!["deform.offsets", "sdf.weight"]
    );

    let mut cfg = config(&dir, "bunny_appearance", Stage::Appearance);
    cfg.use_sdf = true;
    let appearance = TrainingController::new(cfg, ScriptedRenderer::new()).unwrap();
    assert_eq!(appearance.trainable_parameters().len(), 3);
}

// =============================================================================
// Stage 1 losses
// =============================================================================

#[test]
fn test_geometry_losses_mask_and_eikonal() {
    let dir = TempDir::new().unwrap();
    let mut controller =
        TrainingController::new(config(&dir, "bunny", Stage::Geometry), ScriptedRenderer::new())
            .unwrap();

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    assert_relative_eq!(losses.get("mask").unwrap(), 0.25);
    assert_relative_eq!(losses.get("eikonal").unwrap(), 0.1);
    assert_relative_eq!(losses.total(), 0.35);
    assert_eq!(losses.terms().len(), 2);
}

#[test]
fn test_geometry_losses_with_mesh_regularizers() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, "bunny", Stage::Geometry);
    cfg.regularizer = RegularizerWeights::laplacian_only();

    let mut renderer = ScriptedRenderer::new();
    renderer.surface = Some(tetrahedron());
    let mut controller = TrainingController::new(cfg, renderer).unwrap();

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    let smooth = losses.get("reg_laplacian_smooth").unwrap();
    let constant = losses.get("reg_laplacian_const").unwrap();
    assert!(smooth > 0.0 && constant > 0.0);
    assert!(losses.get("reg_edge_length").is_none());
    assert_relative_eq!(losses.total(), 0.35 + smooth + constant, epsilon = 1e-12);
    assert_eq!(controller.renderer().gradient_calls, 1);

    // Evaluation reports the same terms but sends no gradient
    controller.eval_step(&view([0.5; 3]), 2, &mut rng()).unwrap();
    assert_eq!(controller.renderer().gradient_calls, 1);
}

#[test]
fn test_geometry_regularizers_skip_empty_surface() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, "bunny", Stage::Geometry);
    cfg.regularizer = RegularizerWeights::default();

    let mut renderer = ScriptedRenderer::new();
    let mut lonely = Mesh::new();
    lonely.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
    renderer.surface = Some(lonely);
    let mut controller = TrainingController::new(cfg, renderer).unwrap();

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    assert_eq!(losses.terms().len(), 2);
    assert_eq!(controller.renderer().gradient_calls, 0);
}

// =============================================================================
// Stage 2 losses
// =============================================================================

fn appearance(dir: &TempDir, renderer: ScriptedRenderer) -> TrainingController<ScriptedRenderer> {
    let mut cfg = config(dir, "bunny_appearance", Stage::Appearance);
    cfg.use_sdf = true;
    cfg.loss.lambda_coarse = 2.0;
    cfg.loss.lambda_fine = 0.5;
    TrainingController::new(cfg, renderer).unwrap()
}

#[test]
fn test_coarse_only_total_is_unweighted() {
    let dir = TempDir::new().unwrap();
    let mut controller = appearance(&dir, ScriptedRenderer::new());

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    // (0.75 - 0.5)^2
    assert_relative_eq!(losses.get("rc").unwrap(), 2.0 * 0.0625);
    assert!(losses.get("rf").is_none());
    assert_relative_eq!(losses.total(), 0.0625);
    // Sample weights are always requested
    assert_eq!(controller.renderer().weight_requests, vec![true]);
}

#[test]
fn test_empty_fine_pass_counts_as_coarse_only() {
    let dir = TempDir::new().unwrap();
    let mut renderer = ScriptedRenderer::new();
    renderer.empty_fine = true;
    let mut controller = appearance(&dir, renderer);

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    assert!(losses.get("rf").is_none());
    assert_relative_eq!(losses.total(), 0.0625);
}

#[test]
fn test_coarse_and_fine_total_is_weighted() {
    let dir = TempDir::new().unwrap();
    let mut renderer = ScriptedRenderer::new();
    renderer.fine_rgb = Some([0.25; 3]);
    let mut controller = appearance(&dir, renderer);

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    assert_relative_eq!(losses.get("rc").unwrap(), 2.0 * 0.0625);
    assert_relative_eq!(losses.get("rf").unwrap(), 0.5 * 0.0625);
    assert_relative_eq!(losses.total(), 2.0 * 0.0625 + 0.5 * 0.0625);
}

#[test]
fn test_separate_fine_criterion() {
    let dir = TempDir::new().unwrap();
    let mut renderer = ScriptedRenderer::new();
    renderer.fine_rgb = Some([0.25; 3]);
    let mut cfg = config(&dir, "bunny_appearance", Stage::Appearance);
    cfg.use_sdf = true;
    cfg.loss.rgb_fine = Some(RgbCriterion::L1);
    let mut controller = TrainingController::new(cfg, renderer).unwrap();

    let losses = controller.train_step(&view([0.5; 3]), 1, &mut rng()).unwrap();
    assert_relative_eq!(losses.get("rc").unwrap(), 0.0625);
    assert_relative_eq!(losses.get("rf").unwrap(), 0.25);
    assert_relative_eq!(losses.total(), 0.3125);
}

#[test]
fn test_flat_materials_add_zero_smoothness() {
    let dir = TempDir::new().unwrap();
    let mut renderer = ScriptedRenderer::new();
    let flat = RenderBuffer::filled(4, 4, &[0.3, 0.6, 0.9, 1.0]).unwrap();
    renderer.material = Some(MaterialBuffers {
        kd: flat.clone(),
        ks: flat.clone(),
        nrm: flat,
    });
    let mut controller = appearance(&dir, renderer);

    let losses = controller.train_step(&view([0.75; 3]), 1, &mut rng()).unwrap();
    assert_eq!(losses.get("material"), Some(0.0));
    assert_eq!(losses.total(), 0.0);
}

#[test]
fn test_short_render_output_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut renderer = ScriptedRenderer::new();
    renderer.drop_ray = true;
    let mut controller = appearance(&dir, renderer);

    let err = controller
        .train_step(&view([0.5; 3]), 1, &mut rng())
        .unwrap_err();
    assert_eq!(err.code().as_str(), "STAGE-3001");
    assert!(err.to_string().contains("15 colours for 16 rays"));
}

// =============================================================================
// Modes, schedules and visualization
// =============================================================================

#[test]
fn test_eval_step_restores_training_mode() {
    let dir = TempDir::new().unwrap();
    let mut controller = appearance(&dir, ScriptedRenderer::new());
    controller.renderer_mut().mode_changes.clear();

    controller.eval_step(&view([0.5; 3]), 3, &mut rng()).unwrap();
    assert_eq!(controller.renderer().mode_changes, vec![false, true]);

    controller.renderer_mut().fail_render = true;
    let err = controller.eval_step(&view([0.5; 3]), 4, &mut rng());
    assert!(matches!(err, Err(StageError::RenderOutput { .. })));
    assert!(controller.renderer().training);
}

#[test]
fn test_post_batch_advances_schedule() {
    let dir = TempDir::new().unwrap();
    let mut controller = appearance(&dir, ScriptedRenderer::new());
    controller.post_batch(4);
    controller.post_batch(2);
    assert_eq!(controller.renderer().sched_steps, vec![4, 2]);
}

#[test]
fn test_vis_step_renders_every_pixel() {
    let dir = TempDir::new().unwrap();
    let mut renderer = ScriptedRenderer::new();
    renderer.fine_rgb = Some([0.6; 3]);
    let mut cfg = config(&dir, "bunny_appearance", Stage::Appearance);
    cfg.use_sdf = true;
    cfg.ray_batch_size = 3;
    let mut controller = TrainingController::new(cfg, renderer).unwrap();

    let report = controller.vis_step(&view([0.5; 3])).unwrap();
    assert_eq!(report.rgb.len(), 8);
    assert_eq!(report.rgb[7], [0.6; 3]);
    assert_relative_eq!(report.psnr, 20.0, epsilon = 1e-4);
    assert_eq!(report.alpha_range, Some((0.5, 0.5)));
    assert!(controller.renderer().training);
}
