//! Mesh validation and reporting.
//!
//! Two layers:
//!
//! - [`validate_mesh_data`] checks raw data (finite coordinates, in-range
//!   indices) and can either reject on the first problem or collect them all.
//! - [`validate_topology`] is the gate every Laplacian, edge-map and normal
//!   evaluator passes through. Silent misindexing corrupts gradients without
//!   raising, so malformed faces are rejected here with the offending index.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::Mesh;
use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult, ValidationIssue};

/// Options for mesh data validation.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Whether to reject the mesh on finding invalid data (default: true).
    /// If false, issues are collected but validation continues.
    pub reject_on_invalid: bool,
    /// Maximum number of issues to collect before stopping (default: 100).
    pub max_issues: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            reject_on_invalid: true,
            max_issues: 100,
        }
    }
}

impl ValidationOptions {
    /// Create options that collect all issues without rejecting.
    pub fn collect_all() -> Self {
        Self {
            reject_on_invalid: false,
            max_issues: 1000,
        }
    }
}

/// Result of mesh data validation.
#[derive(Debug, Clone, Default)]
pub struct DataValidationResult {
    /// List of issues found during validation.
    pub issues: Vec<ValidationIssue>,
    /// Number of invalid vertex indices found.
    pub invalid_index_count: usize,
    /// Number of NaN coordinates found.
    pub nan_count: usize,
    /// Number of infinite coordinates found.
    pub infinity_count: usize,
}

impl DataValidationResult {
    /// Check if validation passed with no issues.
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Get total number of issues found.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

impl std::fmt::Display for DataValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Data validation passed: no issues found")
        } else {
            writeln!(f, "Data validation found {} issue(s):", self.issue_count())?;
            if self.invalid_index_count > 0 {
                writeln!(f, "  - {} invalid vertex indices", self.invalid_index_count)?;
            }
            if self.nan_count > 0 {
                writeln!(f, "  - {} NaN coordinates", self.nan_count)?;
            }
            if self.infinity_count > 0 {
                writeln!(f, "  - {} infinite coordinates", self.infinity_count)?;
            }
            Ok(())
        }
    }
}

/// Validate mesh data for invalid indices and coordinates.
///
/// # Returns
/// - `Ok(DataValidationResult)`: validation completed (check `is_valid()`)
/// - `Err(MeshError)`: only when `reject_on_invalid` is set and an issue was found
///
/// # Example
/// ```
/// use mesh_regularize::{Mesh, validate::{validate_mesh_data, ValidationOptions}};
///
/// let mesh = Mesh::new();
/// let result = validate_mesh_data(&mesh, &ValidationOptions::default()).unwrap();
/// assert!(result.is_valid());
/// ```
pub fn validate_mesh_data(
    mesh: &Mesh,
    options: &ValidationOptions,
) -> MeshResult<DataValidationResult> {
    let mut result = DataValidationResult::default();
    let vertex_count = mesh.vertices.len();

    'vertices: for (vertex_idx, vertex) in mesh.vertices.iter().enumerate() {
        let coords = [
            ("x", vertex.position.x),
            ("y", vertex.position.y),
            ("z", vertex.position.z),
        ];

        for (coord_name, value) in coords {
            if value.is_finite() {
                continue;
            }
            if options.reject_on_invalid {
                return Err(MeshError::InvalidCoordinate {
                    vertex_index: vertex_idx,
                    coordinate: coord_name,
                    value,
                });
            }
            if result.issues.len() >= options.max_issues {
                break 'vertices;
            }
            if value.is_nan() {
                result.nan_count += 1;
                result.issues.push(ValidationIssue::NaNCoordinate {
                    vertex_index: vertex_idx,
                    coordinate: coord_name,
                });
            } else {
                result.infinity_count += 1;
                result.issues.push(ValidationIssue::InfiniteCoordinate {
                    vertex_index: vertex_idx,
                    coordinate: coord_name,
                    value,
                });
            }
        }
    }

    'faces: for (face_idx, face) in mesh.faces.iter().enumerate() {
        for &vertex_idx in face {
            if (vertex_idx as usize) < vertex_count {
                continue;
            }
            if options.reject_on_invalid {
                return Err(MeshError::invalid_vertex_index(
                    face_idx,
                    vertex_idx,
                    vertex_count,
                ));
            }
            if result.issues.len() >= options.max_issues {
                break 'faces;
            }
            result.invalid_index_count += 1;
            result.issues.push(ValidationIssue::InvalidVertexIndex {
                face_index: face_idx,
                vertex_index: vertex_idx,
                vertex_count,
            });
        }
    }

    if result.is_valid() {
        debug!("Mesh data validation passed");
    } else {
        warn!(
            issues = result.issues.len(),
            invalid_indices = result.invalid_index_count,
            nan = result.nan_count,
            inf = result.infinity_count,
            "Mesh data validation found issues"
        );
    }

    Ok(result)
}

/// Validate mesh data with default options (rejects on first error).
pub fn validate_mesh_data_strict(mesh: &Mesh) -> MeshResult<()> {
    validate_mesh_data(mesh, &ValidationOptions::default())?;
    Ok(())
}

/// Reject empty face lists, repeated corners and edges with more than two faces.
///
/// Index range is not checked here since the vertex count is unknown; see
/// [`validate_topology`]. Faces are scanned in order so the reported
/// offender is always the first one.
pub(crate) fn validate_faces(faces: &[[u32; 3]]) -> MeshResult<()> {
    if faces.is_empty() {
        return Err(MeshError::empty_mesh("face list is empty"));
    }

    let mut edge_counts: HashMap<(u32, u32), usize> = HashMap::with_capacity(faces.len() * 3 / 2);
    for (face_idx, &face) in faces.iter().enumerate() {
        let [a, b, c] = face;
        if a == b || b == c || a == c {
            return Err(MeshError::DegenerateFace {
                face_index: face_idx,
                vertices: face,
            });
        }
        for (u, v) in [(a, b), (b, c), (c, a)] {
            let key = if u < v { (u, v) } else { (v, u) };
            let count = edge_counts.entry(key).or_insert(0);
            *count += 1;
            if *count > 2 {
                return Err(MeshError::NonManifoldEdge {
                    vertex_a: key.0,
                    vertex_b: key.1,
                    face_count: *count,
                });
            }
        }
    }
    Ok(())
}

/// Topology gate for every regularizer.
///
/// # Errors
///
/// - [`MeshError::EmptyMesh`]: no faces.
/// - [`MeshError::InvalidVertexIndex`]: a face index `>= vertex_count`.
/// - [`MeshError::DegenerateFace`]: a face repeats a vertex index.
/// - [`MeshError::NonManifoldEdge`]: an edge is shared by more than two faces.
pub fn validate_topology(vertex_count: usize, faces: &[[u32; 3]]) -> MeshResult<()> {
    for (face_idx, face) in faces.iter().enumerate() {
        if let Some(&bad) = face.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::invalid_vertex_index(face_idx, bad, vertex_count));
        }
    }
    validate_faces(faces)
}

/// Topological summary of a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyReport {
    /// Total vertex count.
    pub vertex_count: usize,
    /// Total face count.
    pub face_count: usize,
    /// Unique undirected edges.
    pub unique_edge_count: usize,
    /// Edges with exactly one adjacent face.
    pub boundary_edge_count: usize,
    /// Edges with exactly two adjacent faces.
    pub interior_edge_count: usize,
    /// Edges with more than two adjacent faces.
    pub non_manifold_edge_count: usize,
    /// Faces that repeat a vertex index.
    pub degenerate_face_count: usize,
    /// Vertices referenced by no face.
    pub isolated_vertex_count: usize,
}

impl TopologyReport {
    /// No boundary edges.
    pub fn is_watertight(&self) -> bool {
        self.boundary_edge_count == 0
    }

    /// No edge with more than two faces.
    pub fn is_manifold(&self) -> bool {
        self.non_manifold_edge_count == 0
    }

    /// Every regularizer accepts this topology.
    pub fn is_regularizable(&self) -> bool {
        self.face_count > 0 && self.is_manifold() && self.degenerate_face_count == 0
    }
}

impl std::fmt::Display for TopologyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Topology Report:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(f, "  Faces: {}", self.face_count)?;
        writeln!(
            f,
            "  Edges: {} ({} interior, {} boundary)",
            self.unique_edge_count, self.interior_edge_count, self.boundary_edge_count
        )?;
        writeln!(
            f,
            "  Watertight: {}",
            if self.is_watertight() { "yes" } else { "NO" }
        )?;
        writeln!(
            f,
            "  Manifold: {} (non-manifold edges: {})",
            if self.is_manifold() { "yes" } else { "NO" },
            self.non_manifold_edge_count
        )?;
        writeln!(f, "  Degenerate faces: {}", self.degenerate_face_count)?;
        writeln!(f, "  Isolated vertices: {}", self.isolated_vertex_count)?;
        Ok(())
    }
}

/// Build a topology report. Never fails: problems are counted, not raised.
pub fn topology_report(mesh: &Mesh) -> TopologyReport {
    let adjacency = MeshAdjacency::build(&mesh.faces);

    let boundary_edge_count = adjacency.boundary_edge_count();
    let non_manifold_edge_count = adjacency.non_manifold_edge_count();
    let interior_edge_count = adjacency
        .edge_to_faces
        .values()
        .filter(|faces| faces.len() == 2)
        .count();
    let degenerate_face_count = mesh
        .faces
        .iter()
        .filter(|&&[a, b, c]| a == b || b == c || a == c)
        .count();
    let isolated_vertex_count = (0..mesh.vertex_count() as u32)
        .filter(|v| adjacency.faces_for_vertex(*v).is_none())
        .count();

    let report = TopologyReport {
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        unique_edge_count: adjacency.edge_count(),
        boundary_edge_count,
        interior_edge_count,
        non_manifold_edge_count,
        degenerate_face_count,
        isolated_vertex_count,
    };

    if !report.is_manifold() {
        warn!(
            non_manifold_edges = non_manifold_edge_count,
            "Mesh is not manifold"
        );
    }
    debug!("{}", report);

    report
}
