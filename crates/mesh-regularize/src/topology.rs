//! Topology-derived structures cached across optimization steps.
//!
//! Vertex positions change every step while faces usually do not. A
//! [`MeshTopology`] holds everything that depends only on faces; a
//! [`Regularizer`] keeps one and rebuilds it only when the mesh's
//! [`topology_fingerprint`](crate::Mesh::topology_fingerprint) changes.

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::Mesh;
use crate::adjacency::{BoundaryPolicy, EdgeFaceMap, compute_edge_to_face_mapping, compute_edges};
use crate::error::MeshResult;
use crate::laplacian::{build_uniform_laplacian, const_loss, smooth_loss_with_operator};
use crate::losses::{
    LossGradient, RegularizerLosses, RegularizerWeights, edge_length_loss, normal_consistency_loss,
};
use crate::sparse::CsrMatrix;
use crate::tracing_ext::{OperationTimer, log_loss_terms, log_mesh_stats};

/// Face-only structures for one mesh topology.
#[derive(Debug, Clone)]
pub struct MeshTopology {
    fingerprint: u64,
    vertex_count: usize,
    faces: Vec<[u32; 3]>,
    edges: Vec<[u32; 2]>,
    edge_faces: EdgeFaceMap,
    laplacian: CsrMatrix,
}

impl MeshTopology {
    /// Validate the mesh's faces and derive every cached structure.
    pub fn build(mesh: &Mesh) -> MeshResult<Self> {
        let _timer =
            OperationTimer::with_context("build_topology", mesh.face_count(), mesh.vertex_count());

        let laplacian = build_uniform_laplacian(mesh.vertex_count(), &mesh.faces)?;
        let edge_faces = compute_edge_to_face_mapping(&mesh.faces, BoundaryPolicy::Exclude)?;

        Ok(Self {
            fingerprint: mesh.topology_fingerprint(),
            vertex_count: mesh.vertex_count(),
            faces: mesh.faces.clone(),
            edges: compute_edges(&mesh.faces),
            edge_faces,
            laplacian,
        })
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Directed per-face edges.
    pub fn edges(&self) -> &[[u32; 2]] {
        &self.edges
    }

    pub fn edge_faces(&self) -> &EdgeFaceMap {
        &self.edge_faces
    }

    pub fn laplacian(&self) -> &CsrMatrix {
        &self.laplacian
    }

    /// Whether this topology was derived from `mesh`'s faces.
    pub fn matches(&self, mesh: &Mesh) -> bool {
        self.fingerprint == mesh.topology_fingerprint()
    }
}

/// Weighted mesh regularizer with a topology cache.
///
/// # Example
///
/// ```
/// use mesh_regularize::{Mesh, Regularizer, RegularizerWeights};
/// use nalgebra::Point3;
///
/// let mesh = Mesh::from_positions(
///     &[
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(1.0, 0.0, 0.0),
///         Point3::new(0.0, 1.0, 0.0),
///         Point3::new(0.0, 0.0, 1.0),
///     ],
///     vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
/// );
/// let mut reg = Regularizer::new(RegularizerWeights::default());
/// let losses = reg.evaluate(&mesh).unwrap();
/// assert!(losses.total > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct Regularizer {
    weights: RegularizerWeights,
    cache: Option<MeshTopology>,
    rebuilds: usize,
}

impl Regularizer {
    pub fn new(weights: RegularizerWeights) -> Self {
        Self {
            weights,
            cache: None,
            rebuilds: 0,
        }
    }

    pub fn weights(&self) -> &RegularizerWeights {
        &self.weights
    }

    /// Number of times the topology cache was (re)built.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    /// Drop the cached topology.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Evaluate every non-zero-weight term.
    pub fn evaluate(&mut self, mesh: &Mesh) -> MeshResult<RegularizerLosses> {
        self.run(mesh, false).map(|(losses, _)| losses)
    }

    /// Evaluate every non-zero-weight term and the weighted total's gradient.
    pub fn evaluate_with_gradient(
        &mut self,
        mesh: &Mesh,
    ) -> MeshResult<(RegularizerLosses, Vec<Vector3<f64>>)> {
        self.run(mesh, true)
    }

    fn topology(&mut self, mesh: &Mesh) -> MeshResult<&MeshTopology> {
        let topology = match self.cache.take() {
            Some(cached) if cached.matches(mesh) => {
                debug!("Reusing cached mesh topology");
                cached
            }
            _ => {
                log_mesh_stats(mesh, "topology rebuild");
                let built = MeshTopology::build(mesh)?;
                self.rebuilds += 1;
                info!(
                    fingerprint = format!("{:016x}", built.fingerprint()),
                    rebuilds = self.rebuilds,
                    "Rebuilt mesh topology cache"
                );
                built
            }
        };
        Ok(self.cache.insert(topology))
    }

    fn run(
        &mut self,
        mesh: &Mesh,
        want_gradient: bool,
    ) -> MeshResult<(RegularizerLosses, Vec<Vector3<f64>>)> {
        self.weights.validate()?;
        let weights = self.weights;
        let positions = mesh.positions();

        let mut losses = RegularizerLosses::default();
        let mut total = LossGradient {
            value: 0.0,
            gradient: if want_gradient {
                vec![Vector3::zeros(); positions.len()]
            } else {
                Vec::new()
            },
        };

        if weights.is_disabled() {
            return Ok((losses, total.gradient));
        }

        let topology = self.topology(mesh)?;

        if weights.edge_length > 0.0 {
            let term = edge_length_loss(&positions, topology.edges(), want_gradient);
            losses.edge_length = Some(term.value);
            total.accumulate(weights.edge_length, &term);
        }
        if weights.laplacian_smooth > 0.0 {
            let term = smooth_loss_with_operator(topology.laplacian(), &positions, want_gradient)?;
            losses.laplacian_smooth = Some(term.value);
            total.accumulate(weights.laplacian_smooth, &term);
        }
        if weights.laplacian_const > 0.0 {
            let term = const_loss(&positions, &topology.faces, want_gradient);
            losses.laplacian_const = Some(term.value);
            total.accumulate(weights.laplacian_const, &term);
        }
        if weights.normal_consistency > 0.0 {
            let term = normal_consistency_loss(
                &positions,
                &topology.faces,
                topology.edge_faces(),
                want_gradient,
            );
            losses.normal_consistency = Some(term.value);
            total.accumulate(weights.normal_consistency, &term);
        }

        losses.total = total.value;
        log_loss_terms("regularizer", &losses.terms());
        Ok((losses, total.gradient))
    }
}
