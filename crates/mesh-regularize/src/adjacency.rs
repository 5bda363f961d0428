//! Edge and adjacency construction from a triangle index buffer.
//!
//! Three views of the same topology are provided:
//!
//! - [`compute_edges`]: the raw per-face edge list (three directed edges per
//!   face, no deduplication). Feeds the average edge length loss.
//! - [`compute_edge_to_face_mapping`]: unique edges paired with the faces that
//!   share them. Feeds the normal consistency loss.
//! - [`MeshAdjacency`]: hash-map lookups for diagnostics and validation.

use hashbrown::HashMap;
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::validate::validate_faces;

/// Directed edges of every face, three per face.
///
/// Face `[f0, f1, f2]` emits `(f1, f2)`, `(f2, f0)`, `(f0, f1)`, i.e. the edge
/// opposite each corner in corner order. The output has exactly
/// `3 * faces.len()` entries and is reproducible for identical input.
pub fn compute_edges(faces: &[[u32; 3]]) -> Vec<[u32; 2]> {
    let mut edges = Vec::with_capacity(faces.len() * 3);
    for &[f0, f1, f2] in faces {
        edges.push([f1, f2]);
        edges.push([f2, f0]);
        edges.push([f0, f1]);
    }
    edges
}

/// Canonical `(min, max)` edges, sorted and deduplicated.
pub fn compute_unique_edges(faces: &[[u32; 3]]) -> Vec<[u32; 2]> {
    let mut edges: Vec<[u32; 2]> = compute_edges(faces)
        .into_iter()
        .map(|[a, b]| canonical(a, b))
        .collect();
    edges.sort_unstable();
    edges.dedup();
    edges
}

#[inline]
fn canonical(a: u32, b: u32) -> [u32; 2] {
    if a < b { [a, b] } else { [b, a] }
}

/// What to do with edges that have a single incident face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryPolicy {
    /// Drop boundary edges. Open meshes are scored on interior edges only.
    #[default]
    Exclude,
    /// Keep boundary edges with the lone face in both slots.
    ///
    /// A boundary edge then compares a face with itself and contributes a
    /// zero penalty, but still counts toward the mean.
    Duplicate,
}

/// A unique edge and its two incident faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeFaces {
    /// Canonical `(min, max)` vertex pair.
    pub edge: [u32; 2],
    /// Incident faces in discovery order (ascending face index).
    pub faces: [u32; 2],
}

/// Unique edges of a mesh paired with their incident faces.
#[derive(Debug, Clone, Default)]
pub struct EdgeFaceMap {
    entries: Vec<EdgeFaces>,
    boundary_edge_count: usize,
    policy: BoundaryPolicy,
}

impl EdgeFaceMap {
    /// Entries sorted by canonical edge.
    pub fn entries(&self) -> &[EdgeFaces] {
        &self.entries
    }

    /// Face pairs in entry order.
    pub fn face_pairs(&self) -> impl Iterator<Item = [u32; 2]> + '_ {
        self.entries.iter().map(|e| e.faces)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no edge survived the boundary policy.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of single-face edges seen, whether kept or excluded.
    pub fn boundary_edge_count(&self) -> usize {
        self.boundary_edge_count
    }

    /// Policy the map was built with.
    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }
}

/// Group the faces incident to each unique edge.
///
/// Every face contributes its three edges; both traversal directions of a
/// shared edge collapse to the same canonical pair. Interior edges record
/// both faces in ascending face order. Boundary edges follow `policy`.
///
/// # Errors
///
/// - [`MeshError::EmptyMesh`] when `faces` is empty.
/// - [`MeshError::DegenerateFace`] when a face repeats a vertex index.
/// - [`MeshError::NonManifoldEdge`] when an edge has more than two faces.
///
/// # Example
///
/// ```
/// use mesh_regularize::{compute_edge_to_face_mapping, BoundaryPolicy};
///
/// let tetra = [[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]];
/// let map = compute_edge_to_face_mapping(&tetra, BoundaryPolicy::Exclude).unwrap();
/// assert_eq!(map.len(), 6);
/// ```
pub fn compute_edge_to_face_mapping(
    faces: &[[u32; 3]],
    policy: BoundaryPolicy,
) -> MeshResult<EdgeFaceMap> {
    validate_faces(faces)?;

    let mut keyed: Vec<([u32; 2], u32)> = Vec::with_capacity(faces.len() * 3);
    for (face_idx, &[f0, f1, f2]) in faces.iter().enumerate() {
        let face_idx = face_idx as u32;
        for (a, b) in [(f1, f2), (f2, f0), (f0, f1)] {
            keyed.push((canonical(a, b), face_idx));
        }
    }
    keyed.sort_unstable();

    let mut entries = Vec::with_capacity(keyed.len() / 2 + 1);
    let mut boundary_edge_count = 0;

    for group in keyed.chunk_by(|a, b| a.0 == b.0) {
        let edge = group[0].0;
        match group {
            [(_, n0), (_, n1)] => entries.push(EdgeFaces {
                edge,
                faces: [*n0, *n1],
            }),
            [(_, n0)] => {
                boundary_edge_count += 1;
                if policy == BoundaryPolicy::Duplicate {
                    entries.push(EdgeFaces {
                        edge,
                        faces: [*n0, *n0],
                    });
                }
            }
            _ => {
                return Err(MeshError::NonManifoldEdge {
                    vertex_a: edge[0],
                    vertex_b: edge[1],
                    face_count: group.len(),
                });
            }
        }
    }

    debug!(
        edges = entries.len(),
        boundary_edges = boundary_edge_count,
        policy = ?policy,
        "Built edge-to-face map"
    );

    Ok(EdgeFaceMap {
        entries,
        boundary_edge_count,
        policy,
    })
}

/// Lightweight topology structure for mesh queries.
///
/// Provides lookups for vertex-to-face and edge-to-face relationships
/// without the overhead of a full half-edge data structure. Unlike
/// [`compute_edge_to_face_mapping`] it accepts any input, including
/// non-manifold meshes, so it can be used to describe what is wrong.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    /// Maps vertex index to the faces that use it.
    pub vertex_to_faces: HashMap<u32, Vec<u32>>,

    /// Maps canonical edge `(min, max)` to the faces that share it.
    pub edge_to_faces: HashMap<(u32, u32), Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency structures from a face list.
    pub fn build(faces: &[[u32; 3]]) -> Self {
        let mut vertex_to_faces: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> = HashMap::new();

        for (face_idx, &[v0, v1, v2]) in faces.iter().enumerate() {
            let face_idx = face_idx as u32;

            vertex_to_faces.entry(v0).or_default().push(face_idx);
            vertex_to_faces.entry(v1).or_default().push(face_idx);
            vertex_to_faces.entry(v2).or_default().push(face_idx);

            for (a, b) in [(v0, v1), (v1, v2), (v2, v0)] {
                let [lo, hi] = canonical(a, b);
                edge_to_faces.entry((lo, hi)).or_default().push(face_idx);
            }
        }

        Self {
            vertex_to_faces,
            edge_to_faces,
        }
    }

    /// Edges with exactly one adjacent face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() == 1)
            .map(|(&edge, _)| edge)
    }

    /// Edges with more than two adjacent faces.
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() > 2)
            .map(|(&edge, _)| edge)
    }

    /// Every edge has at most two faces.
    pub fn is_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|faces| faces.len() <= 2)
    }

    /// No edge has a single face.
    pub fn is_watertight(&self) -> bool {
        self.edge_to_faces.values().all(|faces| faces.len() >= 2)
    }

    /// Number of unique edges.
    pub fn edge_count(&self) -> usize {
        self.edge_to_faces.len()
    }

    /// Count boundary edges.
    pub fn boundary_edge_count(&self) -> usize {
        self.boundary_edges().count()
    }

    /// Count non-manifold edges.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.non_manifold_edges().count()
    }

    /// Get faces adjacent to a vertex.
    pub fn faces_for_vertex(&self, vertex_idx: u32) -> Option<&[u32]> {
        self.vertex_to_faces.get(&vertex_idx).map(|v| v.as_slice())
    }

    /// Get faces adjacent to an edge, in either orientation.
    pub fn faces_for_edge(&self, v0: u32, v1: u32) -> Option<&[u32]> {
        let [lo, hi] = canonical(v0, v1);
        self.edge_to_faces.get(&(lo, hi)).map(|v| v.as_slice())
    }

    /// Vertices sharing an edge with `vertex_idx`, sorted.
    pub fn vertex_neighbors(&self, vertex_idx: u32) -> Vec<u32> {
        let mut neighbors: Vec<u32> = self
            .edge_to_faces
            .keys()
            .filter_map(|&(a, b)| match (a == vertex_idx, b == vertex_idx) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect();
        neighbors.sort_unstable();
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Vec<[u32; 3]> {
        vec![[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]]
    }

    fn quad() -> Vec<[u32; 3]> {
        vec![[0, 1, 2], [0, 2, 3]]
    }

    #[test]
    fn test_compute_edges_corner_order() {
        let edges = compute_edges(&[[4, 7, 9]]);
        assert_eq!(edges, vec![[7, 9], [9, 4], [4, 7]]);
    }

    #[test]
    fn test_compute_edges_keeps_duplicates() {
        let edges = compute_edges(&quad());
        assert_eq!(edges.len(), 6);
        // The shared diagonal appears once per face, in opposite directions.
        assert!(edges.contains(&[2, 0]));
        assert!(edges.contains(&[0, 2]));
    }

    #[test]
    fn test_unique_edges() {
        assert_eq!(compute_unique_edges(&tetrahedron()).len(), 6);
        assert_eq!(compute_unique_edges(&quad()).len(), 5);
    }

    #[test]
    fn test_tetrahedron_edge_map() {
        let map = compute_edge_to_face_mapping(&tetrahedron(), BoundaryPolicy::Exclude).unwrap();
        assert_eq!(map.len(), 6);
        assert_eq!(map.boundary_edge_count(), 0);
        for entry in map.entries() {
            assert!(entry.faces[0] < entry.faces[1]);
            assert!(entry.faces.iter().all(|&f| (f as usize) < 4));
        }
    }

    #[test]
    fn test_edge_map_sorted_by_edge() {
        let map = compute_edge_to_face_mapping(&tetrahedron(), BoundaryPolicy::Exclude).unwrap();
        let edges: Vec<[u32; 2]> = map.entries().iter().map(|e| e.edge).collect();
        let mut sorted = edges.clone();
        sorted.sort();
        assert_eq!(edges, sorted);
    }

    #[test]
    fn test_boundary_policy_exclude() {
        let map = compute_edge_to_face_mapping(&quad(), BoundaryPolicy::Exclude).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.entries()[0].edge, [0, 2]);
        assert_eq!(map.entries()[0].faces, [0, 1]);
        assert_eq!(map.boundary_edge_count(), 4);
    }

    #[test]
    fn test_boundary_policy_duplicate() {
        let map = compute_edge_to_face_mapping(&quad(), BoundaryPolicy::Duplicate).unwrap();
        assert_eq!(map.len(), 5);
        let lone: Vec<_> = map
            .entries()
            .iter()
            .filter(|e| e.faces[0] == e.faces[1])
            .collect();
        assert_eq!(lone.len(), 4);
    }

    #[test]
    fn test_edge_map_rejects_non_manifold() {
        let faces = vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]];
        let err = compute_edge_to_face_mapping(&faces, BoundaryPolicy::Exclude).unwrap_err();
        match err {
            MeshError::NonManifoldEdge {
                vertex_a,
                vertex_b,
                face_count,
            } => {
                assert_eq!((vertex_a, vertex_b), (0, 1));
                assert_eq!(face_count, 3);
            }
            other => panic!("Expected NonManifoldEdge, got {:?}", other),
        }
    }

    #[test]
    fn test_edge_map_rejects_empty_and_degenerate() {
        assert!(matches!(
            compute_edge_to_face_mapping(&[], BoundaryPolicy::Exclude),
            Err(MeshError::EmptyMesh { .. })
        ));
        assert!(matches!(
            compute_edge_to_face_mapping(&[[0, 0, 1]], BoundaryPolicy::Exclude),
            Err(MeshError::DegenerateFace { face_index: 0, .. })
        ));
    }

    #[test]
    fn test_adjacency_tetrahedron() {
        let adj = MeshAdjacency::build(&tetrahedron());
        assert!(adj.is_watertight());
        assert!(adj.is_manifold());
        assert_eq!(adj.edge_count(), 6);
        for v in 0..4u32 {
            assert_eq!(adj.faces_for_vertex(v).map(<[u32]>::len), Some(3));
        }
    }

    #[test]
    fn test_adjacency_quad() {
        let adj = MeshAdjacency::build(&quad());
        assert!(!adj.is_watertight());
        assert_eq!(adj.boundary_edge_count(), 4);
        assert_eq!(adj.faces_for_edge(2, 0), adj.faces_for_edge(0, 2));
        assert_eq!(adj.vertex_neighbors(0), vec![1, 2, 3]);
        assert_eq!(adj.vertex_neighbors(1), vec![0, 2]);
    }
}
