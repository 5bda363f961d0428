//! Differentiable regularizers for triangle meshes being optimized against
//! rendered images.
//!
//! Every loss works on a mesh's vertex positions and a fixed face list, and
//! comes in two forms: a plain value (`avg_edge_length`,
//! `laplacian_smooth_loss`, ...) and a `*_with_gradient` form returning
//! the analytic derivative with respect to each vertex position. A
//! [`Regularizer`] combines them with per-term weights and caches every
//! face-derived structure across steps that only move vertices.
//!
//! # Features
//!
//! - **Topology**: directed edge lists, shared-edge to face-pair maps with an
//!   explicit [`BoundaryPolicy`], strict face validation
//! - **Operators**: the uniform graph Laplacian as a [`CsrMatrix`]
//! - **Losses**: average edge length, Laplacian smoothness (the sparse
//!   operator form and the degree-normalized scatter form), normal
//!   consistency
//! - **Image space**: the jittered finite-difference image gradient and the
//!   material smoothness penalty on [`RenderBuffer`]s
//! - **File I/O**: OBJ and PLY
//!
//! # Conventions
//!
//! Faces are `[u32; 3]` indices into the vertex list, wound
//! counter-clockwise when viewed from outside. Repeated indices within a
//! face and edges shared by more than two faces are rejected, so every
//! operator here sees a manifold-edge mesh.
//!
//! # Quick Start
//!
//! ```no_run
//! use mesh_regularize::{Mesh, Regularizer, RegularizerWeights};
//!
//! let mut mesh = Mesh::load("sphere.obj").unwrap();
//! let mut reg = Regularizer::new(RegularizerWeights::default());
//!
//! for _ in 0..100 {
//!     let (losses, grad) = reg.evaluate_with_gradient(&mesh).unwrap();
//!     println!("total = {:.6}", losses.total);
//!     for (v, g) in mesh.vertices.iter_mut().zip(&grad) {
//!         v.position -= g * 0.01;
//!     }
//! }
//! mesh.save("smoothed.ply").unwrap();
//! ```
//!
//! # Parallelism
//!
//! With the default `parallel` feature, Laplacian products and per-face
//! scatters over large meshes run on rayon's global pool. Results are
//! identical up to floating-point summation order.

mod error;
pub mod tracing_ext;
mod types;

#[cfg(test)]
mod fixtures;

pub mod adjacency;
pub mod image;
pub mod io;
pub mod laplacian;
pub mod losses;
pub mod sparse;
pub mod topology;
pub mod validate;

pub use error::{
    ErrorCode, IssueSeverity, MeshError, MeshLocation, MeshResult, RecoverySuggestion,
    ValidationIssue,
};
pub use types::{Mesh, Triangle, Vertex};

pub use adjacency::{
    BoundaryPolicy, EdgeFaceMap, EdgeFaces, MeshAdjacency, compute_edge_to_face_mapping,
    compute_edges, compute_unique_edges,
};
pub use image::{
    ImageGradParams, MaterialSmoothnessWeights, RenderBuffer, image_grad, image_grad_buffer,
    material_smoothness_grad, sample_bilinear_clamped,
};
pub use io::{MeshFormat, load_mesh, save_mesh, save_obj, save_ply_ascii};
pub use laplacian::{
    build_uniform_laplacian, laplace_regularizer_const, laplace_regularizer_const_with_gradient,
    laplacian_smooth_loss, laplacian_smooth_loss_with_gradient,
};
pub use losses::{
    LossGradient, NORMAL_CONSISTENCY_SCALE, NORMAL_CONSISTENCY_THRESHOLD, RegularizerLosses,
    RegularizerWeights, SAFE_NORMALIZE_EPS, avg_edge_length, avg_edge_length_with_gradient,
    face_normals, normal_consistency, normal_consistency_with_gradient, safe_normalize,
};
pub use sparse::{CooBuilder, CsrMatrix, RowView};
pub use topology::{MeshTopology, Regularizer};
pub use validate::{
    DataValidationResult, TopologyReport, ValidationOptions, topology_report, validate_mesh_data,
    validate_mesh_data_strict, validate_topology,
};

pub use tracing_ext::{
    OperationTimer, log_io_operation, log_loss_terms, log_mesh_stats, log_topology_report,
};

impl Mesh {
    /// Load a mesh from a file, auto-detecting format from extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Save the mesh to a file, auto-detecting format from extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> MeshResult<()> {
        io::save_mesh(self, path.as_ref())
    }

    /// Summarize edge manifoldness and degeneracy.
    pub fn topology_report(&self) -> TopologyReport {
        validate::topology_report(self)
    }

    /// Check that every face is a valid, non-degenerate triangle over
    /// manifold edges.
    pub fn validate_topology(&self) -> MeshResult<()> {
        validate::validate_topology(self.vertex_count(), &self.faces)
    }

    /// Evaluate all four regularizers with unit weights.
    ///
    /// Builds the topology from scratch; use a [`Regularizer`] when
    /// evaluating the same topology repeatedly.
    pub fn regularizer_losses(&self) -> MeshResult<RegularizerLosses> {
        Regularizer::new(RegularizerWeights::default()).evaluate(self)
    }
}
