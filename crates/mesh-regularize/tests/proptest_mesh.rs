//! Property-based tests for the regularizers.
//!
//! Random meshes come from two sources: arbitrary index triples (often
//! invalid, exercising the topology gate) and random face subsets of a
//! jittered grid (always manifold).
//!
//! Run with: cargo test -p mesh-regularize -- proptest

use approx::relative_eq;
use mesh_regularize::{
    BoundaryPolicy, Mesh, Regularizer, RegularizerWeights, Vertex, build_uniform_laplacian,
    compute_edge_to_face_mapping, compute_unique_edges, validate_topology,
};
use nalgebra::Vector3;
use proptest::prelude::*;

// =============================================================================
// Strategies for generating random meshes
// =============================================================================

fn arb_position() -> impl Strategy<Value = [f64; 3]> {
    prop::array::uniform3(-10.0..10.0f64)
}

/// Arbitrary faces over `vertex_count` vertices; may be degenerate or
/// non-manifold.
fn arb_faces(vertex_count: u32, max_faces: usize) -> impl Strategy<Value = Vec<[u32; 3]>> {
    prop::collection::vec(prop::array::uniform3(0..vertex_count), 1..=max_faces)
}

/// A `cols x rows` grid of quads split into triangles, with every vertex
/// jittered and a random subset of the triangles kept.
fn arb_grid_patch() -> impl Strategy<Value = Mesh> {
    (2usize..6, 2usize..6).prop_flat_map(|(cols, rows)| {
        let vertex_count = (cols + 1) * (rows + 1);
        let face_count = cols * rows * 2;
        (
            prop::collection::vec(prop::array::uniform3(-0.3..0.3f64), vertex_count),
            prop::collection::vec(any::<bool>(), face_count),
        )
            .prop_filter("need at least one face", |(_, keep)| keep.iter().any(|&k| k))
            .prop_map(move |(jitter, keep)| {
                let stride = (cols + 1) as u32;
                let mut mesh = Mesh::new();
                for r in 0..=rows {
                    for c in 0..=cols {
                        let j = jitter[r * (cols + 1) + c];
                        mesh.vertices.push(Vertex::from_coords(
                            c as f64 + j[0],
                            r as f64 + j[1],
                            j[2],
                        ));
                    }
                }
                let mut k = 0;
                for r in 0..rows as u32 {
                    for c in 0..cols as u32 {
                        let v00 = r * stride + c;
                        let (v10, v01, v11) = (v00 + 1, v00 + stride, v00 + stride + 1);
                        for tri in [[v00, v10, v11], [v00, v11, v01]] {
                            if keep[k] {
                                mesh.faces.push(tri);
                            }
                            k += 1;
                        }
                    }
                }
                mesh
            })
    })
}

// =============================================================================
// Topology gate
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_laplacian_builds_iff_topology_is_valid(faces in arb_faces(12, 30)) {
        let valid = validate_topology(12, &faces).is_ok();
        let built = build_uniform_laplacian(12, &faces);
        prop_assert_eq!(valid, built.is_ok());

        if let Ok(lap) = built {
            prop_assert!(lap.is_symmetric(0.0));
            for sum in lap.row_sums() {
                prop_assert_eq!(sum, 0.0);
            }
        }
    }

    #[test]
    fn proptest_edge_map_rejects_what_validation_rejects(faces in arb_faces(8, 20)) {
        let valid = validate_topology(8, &faces).is_ok();
        let mapped = compute_edge_to_face_mapping(&faces, BoundaryPolicy::Exclude);
        prop_assert_eq!(valid, mapped.is_ok());
    }
}

// =============================================================================
// Manifold patches
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_laplacian_symmetric_with_zero_rows(mesh in arb_grid_patch()) {
        let lap = build_uniform_laplacian(mesh.vertex_count(), &mesh.faces).unwrap();
        prop_assert!(lap.is_symmetric(0.0));
        for (i, sum) in lap.row_sums().into_iter().enumerate() {
            prop_assert_eq!(sum, 0.0, "row {}", i);
        }
        // Degree equals the number of distinct neighbours
        let unique = compute_unique_edges(&mesh.faces);
        let degree_sum: f64 = lap.diagonal().iter().sum();
        prop_assert_eq!(degree_sum as usize, 2 * unique.len());
    }

    #[test]
    fn proptest_edge_map_entries_are_valid(mesh in arb_grid_patch()) {
        let unique = compute_unique_edges(&mesh.faces);
        let excluded = compute_edge_to_face_mapping(&mesh.faces, BoundaryPolicy::Exclude).unwrap();
        let duplicated =
            compute_edge_to_face_mapping(&mesh.faces, BoundaryPolicy::Duplicate).unwrap();

        prop_assert_eq!(duplicated.len(), unique.len());
        prop_assert_eq!(excluded.len() + excluded.boundary_edge_count(), unique.len());

        for entry in duplicated.entries() {
            for f in entry.faces {
                let face = mesh.faces[f as usize];
                prop_assert!(face.contains(&entry.edge[0]));
                prop_assert!(face.contains(&entry.edge[1]));
            }
        }
        for entry in excluded.entries() {
            prop_assert!(entry.faces[0] < entry.faces[1]);
        }
    }

    #[test]
    fn proptest_losses_are_translation_invariant(
        mesh in arb_grid_patch(),
        offset in arb_position(),
    ) {
        let mut reg = Regularizer::new(RegularizerWeights::default());
        let (before, grad_before) = reg.evaluate_with_gradient(&mesh).unwrap();

        let mut moved = mesh.clone();
        moved.translate(Vector3::from(offset));
        let (after, grad_after) = reg.evaluate_with_gradient(&moved).unwrap();

        prop_assert_eq!(reg.rebuild_count(), 1);
        prop_assert!(relative_eq!(before.total, after.total, epsilon = 1e-9, max_relative = 1e-9));
        for (a, b) in grad_before.iter().zip(&grad_after) {
            prop_assert!(relative_eq!(a, b, epsilon = 1e-7, max_relative = 1e-6));
        }
    }

    #[test]
    fn proptest_losses_are_finite_and_non_negative(mesh in arb_grid_patch()) {
        let mut reg = Regularizer::new(RegularizerWeights::default());
        let (losses, grad) = reg.evaluate_with_gradient(&mesh).unwrap();
        for (name, value) in losses.terms() {
            prop_assert!(value.is_finite() && value >= 0.0, "{} = {}", name, value);
        }
        prop_assert!(grad.iter().all(|g| g.iter().all(|c| c.is_finite())));
    }
}
