//! Two-stage training controller.
//!
//! A [`TrainingController`] owns one renderer for one run. Stage 1 fits
//! geometry to silhouettes; stage 2 fits appearance on the mesh stage 1
//! exported. The stages are separate runs: stage 2 finds its mesh through
//! the [`MeshArtifactStore`] and refuses to start without it.
//!
//! The controller computes losses and their bookkeeping. Parameter updates
//! belong to whoever drives it: after [`train_step`](TrainingController::train_step)
//! the caller applies its optimizer to the renderer's
//! [`trainable_parameters`](TrainingController::trainable_parameters) and
//! calls [`post_batch`](TrainingController::post_batch).

use std::path::PathBuf;

use mesh_regularize::tracing_ext::{OperationTimer, log_loss_terms};
use mesh_regularize::{
    Regularizer, RenderBuffer, image_grad_buffer, material_smoothness_grad,
};
use nalgebra::Matrix4;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactManifest, MeshArtifactStore};
use crate::checkpoint::{CheckpointStore, LoadReport};
use crate::config::{Stage, StageConfig};
use crate::error::{StageError, StageResult};
use crate::loss::{LossBreakdown, mse, psnr};
use crate::renderer::{MaterialBuffers, Ray, RenderPass, Renderer};

/// One training image with its camera.
#[derive(Debug, Clone)]
pub struct View {
    height: usize,
    width: usize,
    /// Row-major colour in `[0, 1]`.
    rgb: Vec<[f32; 3]>,
    /// Row-major silhouette in `[0, 1]`.
    mask: Vec<f32>,
    /// One camera ray per pixel.
    rays: Vec<Ray>,
    mvp: Matrix4<f32>,
}

impl View {
    /// Build a view from colour already in `[0, 1]`.
    pub fn new(
        height: usize,
        width: usize,
        rgb: Vec<[f32; 3]>,
        mask: Vec<f32>,
        rays: Vec<Ray>,
        mvp: Matrix4<f32>,
    ) -> StageResult<Self> {
        let pixels = height * width;
        if pixels == 0 {
            return Err(StageError::invalid_config(
                "view",
                format!("image must have at least one pixel, got {}x{}", width, height),
            ));
        }
        for (what, len) in [("rgb", rgb.len()), ("mask", mask.len()), ("rays", rays.len())] {
            if len != pixels {
                return Err(StageError::invalid_config(
                    format!("view.{}", what),
                    format!("expected {} values for a {}x{} image, got {}", pixels, width, height, len),
                ));
            }
        }
        Ok(Self {
            height,
            width,
            rgb,
            mask,
            rays,
            mvp,
        })
    }

    /// Build a view from colour in `[-1, 1]`, as datasets usually store it.
    pub fn from_signed_rgb(
        height: usize,
        width: usize,
        signed_rgb: &[[f32; 3]],
        mask: Vec<f32>,
        rays: Vec<Ray>,
        mvp: Matrix4<f32>,
    ) -> StageResult<Self> {
        let rgb = signed_rgb
            .iter()
            .map(|p| p.map(|c| c * 0.5 + 0.5))
            .collect();
        Self::new(height, width, rgb, mask, rays, mvp)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn pixel_count(&self) -> usize {
        self.height * self.width
    }

    pub fn rgb(&self) -> &[[f32; 3]] {
        &self.rgb
    }

    pub fn mask(&self) -> &[f32] {
        &self.mask
    }

    pub fn rays(&self) -> &[Ray] {
        &self.rays
    }

    pub fn mvp(&self) -> &Matrix4<f32> {
        &self.mvp
    }
}

/// Draw `batch` pixel indices uniformly from `0..pixel_count`, with
/// replacement.
pub fn sample_pixels<R: Rng + ?Sized>(rng: &mut R, pixel_count: usize, batch: usize) -> Vec<usize> {
    if pixel_count == 0 {
        return Vec::new();
    }
    (0..batch).map(|_| rng.gen_range(0..pixel_count)).collect()
}

/// Paths written by [`TrainingController::save_checkpoint`].
#[derive(Debug, Clone)]
pub struct SavedCheckpoint {
    pub state_path: PathBuf,
    /// Published mesh, in the geometry stage only.
    pub artifact: Option<ArtifactManifest>,
}

/// Full-image diagnostics from [`TrainingController::vis_step`].
#[derive(Debug, Clone)]
pub struct VisReport {
    /// Row-major rendered colour.
    pub rgb: Vec<[f32; 3]>,
    /// Against the view's colour; fine pass when the renderer has one.
    pub psnr: f64,
    /// Smallest and largest accumulated opacity, when weights were returned.
    pub alpha_range: Option<(f32, f32)>,
}

/// Drives one renderer through one stage of training.
pub struct TrainingController<R: Renderer> {
    config: StageConfig,
    renderer: R,
    regularizer: Regularizer,
    checkpoints: CheckpointStore,
    artifacts: MeshArtifactStore,
    geometry: Option<ArtifactManifest>,
    restored: Option<LoadReport>,
}

impl<R: Renderer> TrainingController<R> {
    /// Validate `config` and prepare `renderer` for its stage.
    ///
    /// In the appearance stage without `use_sdf`, the geometry stage's mesh
    /// artifact must exist. Checkpointed parameters are restored first and
    /// the artifact is loaded into the renderer last, so the published mesh
    /// wins over any geometry the checkpoint carries.
    ///
    /// # Errors
    ///
    /// Configuration errors and [`StageError::MissingArtifact`] are returned
    /// before the renderer is touched.
    pub fn new(config: StageConfig, mut renderer: R) -> StageResult<Self> {
        config.validate()?;
        let artifacts = MeshArtifactStore::new(&config.geometry_root);
        let checkpoints = CheckpointStore::new(config.checkpoint_path());

        let artifact = if config.requires_artifact() {
            Some(artifacts.consume(&config.run_name)?)
        } else {
            None
        };

        let mut state = renderer.state_dict();
        let restored = checkpoints.restore_into(&mut state)?;
        if restored.is_some() {
            renderer.load_state_dict(state);
        }

        let geometry = match artifact {
            Some(loaded) => {
                renderer.init_from_mesh(&loaded.mesh)?;
                Some(loaded.manifest)
            }
            None => None,
        };
        renderer.set_training(true);

        info!(
            run = %config.run_name,
            stage = %config.stage,
            use_sdf = config.use_sdf,
            restored = restored.is_some(),
            "Training controller ready"
        );

        Ok(Self {
            regularizer: Regularizer::new(config.regularizer),
            config,
            renderer,
            checkpoints,
            artifacts,
            geometry,
            restored,
        })
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn stage(&self) -> Stage {
        self.config.stage
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Manifest of the consumed stage-1 mesh, in the appearance stage.
    pub fn geometry(&self) -> Option<&ArtifactManifest> {
        self.geometry.as_ref()
    }

    /// Outcome of the checkpoint restore at construction.
    pub fn restored(&self) -> Option<&LoadReport> {
        self.restored.as_ref()
    }

    /// Names of the renderer parameters this stage optimizes.
    pub fn trainable_parameters(&self) -> Vec<String> {
        let stage = self.config.stage;
        self.renderer
            .state_dict()
            .names()
            .filter(|name| stage.trains_parameter(name))
            .map(str::to_string)
            .collect()
    }

    /// Losses for one view on a random batch of its pixels.
    pub fn calc_losses<G: Rng + ?Sized>(
        &mut self,
        view: &View,
        is_train: bool,
        global_step: u64,
        rng: &mut G,
    ) -> StageResult<LossBreakdown> {
        let _timer = OperationTimer::new("calc_losses");
        let pixels = sample_pixels(rng, view.pixel_count(), self.config.ray_batch_size);
        let rays: Vec<Ray> = pixels.iter().map(|&i| view.rays[i]).collect();

        let losses = match self.config.stage {
            Stage::Geometry => self.geometry_losses(view, &rays, is_train, global_step)?,
            Stage::Appearance => self.appearance_losses(view, &pixels, &rays, rng)?,
        };
        log_loss_terms(self.config.stage.name(), &losses.as_pairs());
        Ok(losses)
    }

    fn geometry_losses(
        &mut self,
        view: &View,
        rays: &[Ray],
        is_train: bool,
        global_step: u64,
    ) -> StageResult<LossBreakdown> {
        let render = self.renderer.render_mask(
            rays,
            &view.mvp,
            view.height,
            view.width,
            global_step,
        )?;
        if render.mask.len() != view.pixel_count() {
            return Err(StageError::render_output(format!(
                "mask has {} values for a {}x{} view",
                render.mask.len(),
                view.width,
                view.height
            )));
        }

        let mut losses = LossBreakdown::new();
        let mask = mse(&render.mask, &view.mask)?;
        losses.push("mask", mask);
        losses.push("eikonal", render.eikonal_loss);
        let mut total = mask + render.eikonal_loss;

        if !self.regularizer.weights().is_disabled() {
            match self.renderer.surface_mesh() {
                Some(mesh) if !mesh.is_empty() => {
                    let reg = if is_train {
                        let (reg, gradient) = self.regularizer.evaluate_with_gradient(&mesh)?;
                        self.renderer.accumulate_mesh_gradient(&gradient);
                        reg
                    } else {
                        self.regularizer.evaluate(&mesh)?
                    };
                    for (name, value) in reg.terms() {
                        if name != "total" {
                            losses.push(format!("reg_{}", name), value);
                        }
                    }
                    total += reg.total;
                }
                Some(_) => debug!("Surface mesh has no faces; skipping mesh regularizers"),
                None => debug!("Renderer keeps no surface mesh; skipping mesh regularizers"),
            }
        }

        losses.set_total(total);
        Ok(losses)
    }

    fn appearance_losses<G: Rng + ?Sized>(
        &mut self,
        view: &View,
        pixels: &[usize],
        rays: &[Ray],
        rng: &mut G,
    ) -> StageResult<LossBreakdown> {
        let output = self.renderer.render(rays, true)?;
        check_pass("coarse", &output.coarse, rays.len())?;
        let target: Vec<[f32; 3]> = pixels.iter().map(|&i| view.rgb[i]).collect();

        let loss = &self.config.loss;
        let mut losses = LossBreakdown::new();
        let coarse = loss.coarse_criterion().evaluate(&output.coarse.rgb, &target)?;
        losses.push("rc", coarse * loss.lambda_coarse);

        let mut total = match output.fine_samples() {
            Some(fine_pass) => {
                check_pass("fine", fine_pass, rays.len())?;
                let fine = loss.fine_criterion().evaluate(&fine_pass.rgb, &target)?;
                losses.push("rf", fine * loss.lambda_fine);
                coarse * loss.lambda_coarse + fine * loss.lambda_fine
            }
            None => coarse,
        };

        if let Some(material) = &output.material {
            let smooth = self.material_loss(material, rng)?;
            losses.push("material", smooth);
            total += smooth;
        }

        losses.set_total(total);
        Ok(losses)
    }

    fn material_loss<G: Rng + ?Sized>(
        &self,
        material: &MaterialBuffers,
        rng: &mut G,
    ) -> StageResult<f64> {
        let params = &self.config.material.image_grad;
        let mut grad = |buf: &RenderBuffer| image_grad_buffer(buf, params, &mut *rng);
        let kd = grad(&material.kd)?;
        let ks = grad(&material.ks)?;
        let nrm = grad(&material.nrm)?;
        let value = material_smoothness_grad(&kd, &ks, &nrm, &self.config.material.weights)?;
        Ok(f64::from(value))
    }

    /// Training-mode losses for one view.
    pub fn train_step<G: Rng + ?Sized>(
        &mut self,
        view: &View,
        global_step: u64,
        rng: &mut G,
    ) -> StageResult<LossBreakdown> {
        let losses = self.calc_losses(view, true, global_step, rng)?;
        if !losses.total().is_finite() {
            warn!(step = global_step, total = losses.total(), "Non-finite training loss");
        }
        debug!(step = global_step, losses = %losses, "Train step");
        Ok(losses)
    }

    /// Evaluation-mode losses; the renderer is back in training mode
    /// afterwards, whether or not evaluation succeeded.
    pub fn eval_step<G: Rng + ?Sized>(
        &mut self,
        view: &View,
        global_step: u64,
        rng: &mut G,
    ) -> StageResult<LossBreakdown> {
        self.renderer.set_training(false);
        let result = self.calc_losses(view, false, global_step, rng);
        self.renderer.set_training(true);

        let losses = result?;
        info!(step = global_step, losses = %losses, "Eval step");
        Ok(losses)
    }

    /// Advance the renderer's schedules once a batch of objects is done.
    pub fn post_batch(&mut self, batch_size: usize) {
        self.renderer.sched_step(batch_size);
    }

    /// Render the whole view in ray batches and report PSNR and opacity.
    pub fn vis_step(&mut self, view: &View) -> StageResult<VisReport> {
        let _timer = OperationTimer::new("vis_step");
        self.renderer.set_training(false);
        let result = self.render_full(view);
        self.renderer.set_training(true);

        let (rgb, alpha) = result?;
        let psnr = psnr(&rgb, &view.rgb)?;
        let alpha_range = if alpha.is_empty() {
            None
        } else {
            Some(alpha.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &a| {
                (lo.min(a), hi.max(a))
            }))
        };
        info!(psnr = psnr, alpha = ?alpha_range, "Rendered view");
        Ok(VisReport {
            rgb,
            psnr,
            alpha_range,
        })
    }

    fn render_full(&mut self, view: &View) -> StageResult<(Vec<[f32; 3]>, Vec<f32>)> {
        let mut rgb = Vec::with_capacity(view.pixel_count());
        let mut alpha = Vec::with_capacity(view.pixel_count());
        for chunk in view.rays.chunks(self.config.ray_batch_size) {
            let output = self.renderer.render(chunk, true)?;
            let pass = output.best_pass();
            check_pass("vis", pass, chunk.len())?;
            rgb.extend_from_slice(&pass.rgb);
            alpha.extend(pass.alpha());
        }
        if alpha.len() != rgb.len() {
            alpha.clear();
        }
        Ok((rgb, alpha))
    }

    /// In the geometry stage, publish the current mesh for the appearance
    /// stage; then persist renderer parameters. A failed export leaves the
    /// previous checkpoint in place.
    pub fn save_checkpoint(&mut self, global_step: u64) -> StageResult<SavedCheckpoint> {
        let artifact = match self.config.stage {
            Stage::Geometry => {
                let mesh = self.renderer.export_mesh(global_step)?;
                Some(
                    self.artifacts
                        .produce(&self.config.run_name, global_step, &mesh)?,
                )
            }
            Stage::Appearance => None,
        };

        self.checkpoints.save(&self.renderer.state_dict())?;

        Ok(SavedCheckpoint {
            state_path: self.checkpoints.path().to_path_buf(),
            artifact,
        })
    }
}

fn check_pass(name: &str, pass: &RenderPass, rays: usize) -> StageResult<()> {
    if pass.rgb.len() != rays {
        return Err(StageError::render_output(format!(
            "{} pass returned {} colours for {} rays",
            name,
            pass.rgb.len(),
            rays
        )));
    }
    if !pass.weights.is_empty() && pass.weights.len() != rays {
        return Err(StageError::render_output(format!(
            "{} pass returned weights for {} of {} rays",
            name,
            pass.weights.len(),
            rays
        )));
    }
    Ok(())
}
