//! Small meshes and a finite-difference checker shared by unit tests.

use nalgebra::{Point3, Vector3};

use crate::Mesh;

pub fn tetrahedron() -> Mesh {
    Mesh::from_positions(
        &[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 0.866025, 0.0),
            Point3::new(0.5, 0.288675, 0.816497),
        ],
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
    )
}

/// Unit-radius icosahedron, outward winding.
pub fn icosahedron() -> Mesh {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let raw = [
        (-1.0, phi, 0.0),
        (1.0, phi, 0.0),
        (-1.0, -phi, 0.0),
        (1.0, -phi, 0.0),
        (0.0, -1.0, phi),
        (0.0, 1.0, phi),
        (0.0, -1.0, -phi),
        (0.0, 1.0, -phi),
        (phi, 0.0, -1.0),
        (phi, 0.0, 1.0),
        (-phi, 0.0, -1.0),
        (-phi, 0.0, 1.0),
    ];
    let positions: Vec<Point3<f64>> = raw
        .iter()
        .map(|&(x, y, z)| Point3::from(Vector3::new(x, y, z).normalize()))
        .collect();
    let faces = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];
    Mesh::from_positions(&positions, faces)
}

/// Regular hexagon fan around vertex 0 at the origin, in the z = 0 plane.
pub fn hex_fan() -> Mesh {
    let mut positions = vec![Point3::origin()];
    for k in 0..6 {
        let a = std::f64::consts::PI / 3.0 * k as f64;
        positions.push(Point3::new(a.cos(), a.sin(), 0.0));
    }
    let faces = (0..6u32).map(|k| [0, 1 + k, 1 + (k + 1) % 6]).collect();
    Mesh::from_positions(&positions, faces)
}

/// Two triangles sharing the edge (0, 1), with vertex 3 rotated about
/// that edge by `fold` radians out of the plane of the first triangle.
pub fn folded_quad(fold: f64) -> Mesh {
    Mesh::from_positions(
        &[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, -fold.cos(), fold.sin()),
        ],
        vec![[0, 1, 2], [1, 0, 3]],
    )
}

/// Central-difference gradient of `f` with respect to every vertex coordinate.
pub fn finite_difference<F>(mesh: &Mesh, f: F) -> Vec<Vector3<f64>>
where
    F: Fn(&Mesh) -> f64,
{
    let h = 1e-6;
    let mut grad = vec![Vector3::zeros(); mesh.vertex_count()];
    let mut shifted = mesh.clone();
    for (i, g) in grad.iter_mut().enumerate() {
        for axis in 0..3 {
            let original = shifted.vertices[i].position[axis];
            shifted.vertices[i].position[axis] = original + h;
            let plus = f(&shifted);
            shifted.vertices[i].position[axis] = original - h;
            let minus = f(&shifted);
            shifted.vertices[i].position[axis] = original;
            g[axis] = (plus - minus) / (2.0 * h);
        }
    }
    grad
}

/// Nudge every vertex off the symmetric configuration, deterministically.
pub fn perturbed(mesh: &Mesh) -> Mesh {
    let mut out = mesh.clone();
    for (i, v) in out.vertices.iter_mut().enumerate() {
        let t = i as f64;
        v.position += Vector3::new((t * 1.3).sin(), (t * 0.7).cos(), (t * 2.1).sin()) * 0.05;
    }
    out
}
