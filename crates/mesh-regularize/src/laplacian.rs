//! Uniform (umbrella) Laplacians.
//!
//! Two independent formulations are provided because they pull with
//! different strengths:
//!
//! - [`build_uniform_laplacian`] + [`laplacian_smooth_loss`]: sparse operator
//!   with `-1` per neighbor and the vertex degree on the diagonal. The loss is
//!   the mean row norm of `L * P`, so high-valence vertices pull harder.
//! - [`laplace_regularizer_const`]: per-face scatter of neighbor differences,
//!   normalized by the accumulated neighbor count (clamped to at least 1),
//!   then the mean of all squared components.
//!
//! Both reject malformed topology before touching any index. Both have a
//! `*_with_gradient` form returning the derivative with respect to each
//! vertex position.

use nalgebra::{Point3, Vector3};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

use crate::Mesh;
use crate::adjacency::compute_edges;
use crate::error::MeshResult;
use crate::losses::LossGradient;
use crate::sparse::{CooBuilder, CsrMatrix};
use crate::validate::validate_topology;

/// Faces at or above this count scatter in parallel.
#[cfg(feature = "parallel")]
const PARALLEL_FACE_THRESHOLD: usize = 8192;

/// Assemble the uniform Laplacian over `vertex_count` vertices.
///
/// Each face contributes the directed pairs `(f1, f2)`, `(f2, f0)`, `(f0, f1)`.
/// Both directions of every pair are taken and exact duplicates removed,
/// so an interior edge seen by two faces counts once. Every remaining pair
/// `(i, j)` contributes `-1` at `(i, j)` and `+1` at `(i, i)`; the builder sums
/// them, which makes the diagonal the vertex degree. Vertices on no face get
/// an all-zero row.
///
/// The result is symmetric and every row sums to zero.
///
/// # Example
///
/// ```
/// use mesh_regularize::build_uniform_laplacian;
///
/// let tetra = [[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]];
/// let lap = build_uniform_laplacian(4, &tetra).unwrap();
/// assert_eq!(lap.get(0, 0), 3.0);
/// assert_eq!(lap.get(0, 1), -1.0);
/// ```
pub fn build_uniform_laplacian(vertex_count: usize, faces: &[[u32; 3]]) -> MeshResult<CsrMatrix> {
    validate_topology(vertex_count, faces)?;

    let mut pairs: Vec<(u32, u32)> = compute_edges(faces)
        .into_iter()
        .flat_map(|[i, j]| [(i, j), (j, i)])
        .collect();
    pairs.sort_unstable();
    pairs.dedup();

    let mut builder = CooBuilder::square_with_capacity(vertex_count, pairs.len() * 2);
    for &(i, j) in &pairs {
        builder.push(i as usize, j as usize, -1.0)?;
        builder.push(i as usize, i as usize, 1.0)?;
    }
    let lap = builder.build()?;

    debug!(
        vertices = vertex_count,
        directed_pairs = pairs.len(),
        nnz = lap.nnz(),
        "Assembled uniform Laplacian"
    );
    Ok(lap)
}

/// Mean over vertices of `|| (L * P)_i ||`.
///
/// Not normalized by degree. Zero when every vertex sits at its neighbor
/// centroid, which only happens on flat regular patches or collapsed meshes.
pub fn laplacian_smooth_loss(mesh: &Mesh) -> MeshResult<f64> {
    let lap = build_uniform_laplacian(mesh.vertex_count(), &mesh.faces)?;
    Ok(smooth_loss_with_operator(&lap, &mesh.positions(), false)?.value)
}

/// [`laplacian_smooth_loss`] with its gradient.
pub fn laplacian_smooth_loss_with_gradient(mesh: &Mesh) -> MeshResult<LossGradient> {
    let lap = build_uniform_laplacian(mesh.vertex_count(), &mesh.faces)?;
    smooth_loss_with_operator(&lap, &mesh.positions(), true)
}

/// Smoothness loss against a prebuilt operator.
///
/// With `r = L P` and `u_i = r_i / |r_i|` (zero where `r_i` vanishes), the
/// gradient is `L^T u / V`, and `L` is symmetric.
pub(crate) fn smooth_loss_with_operator(
    lap: &CsrMatrix,
    positions: &[Point3<f64>],
    want_gradient: bool,
) -> MeshResult<LossGradient> {
    let coords: Vec<Vector3<f64>> = positions.iter().map(|p| p.coords).collect();
    let residual = lap.mul_vectors(&coords)?;
    let n = residual.len().max(1) as f64;

    let value = residual.iter().map(|r| r.norm()).sum::<f64>() / n;

    let gradient = if want_gradient {
        let unit: Vec<Vector3<f64>> = residual
            .iter()
            .map(|r| {
                let len = r.norm();
                if len > 0.0 { r / len } else { Vector3::zeros() }
            })
            .collect();
        lap.mul_vectors(&unit)?.into_iter().map(|g| g / n).collect()
    } else {
        Vec::new()
    };

    Ok(LossGradient { value, gradient })
}

/// Degree-normalized umbrella loss via per-face scatter.
///
/// For vertex `a` of face `(a, b, c)` the face adds `(p_b - p_a) + (p_c - p_a)`
/// to `a`'s accumulator and 2 to its neighbor count. Accumulators are
/// divided by `max(count, 1)`, and the loss is the mean of all `3V` squared
/// components.
pub fn laplace_regularizer_const(mesh: &Mesh) -> MeshResult<f64> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    Ok(const_loss(&mesh.positions(), &mesh.faces, false).value)
}

/// [`laplace_regularizer_const`] with its gradient.
pub fn laplace_regularizer_const_with_gradient(mesh: &Mesh) -> MeshResult<LossGradient> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    Ok(const_loss(&mesh.positions(), &mesh.faces, true))
}

/// Assumes validated topology.
pub(crate) fn const_loss(
    positions: &[Point3<f64>],
    faces: &[[u32; 3]],
    want_gradient: bool,
) -> LossGradient {
    let vertex_count = positions.len();
    let (term, count) = scatter_umbrella(positions, faces);

    let normalized: Vec<Vector3<f64>> = term
        .iter()
        .zip(&count)
        .map(|(t, &n)| t / n.max(1.0))
        .collect();

    let components = (3 * vertex_count).max(1) as f64;
    let value = normalized.iter().map(|t| t.norm_squared()).sum::<f64>() / components;

    if !want_gradient {
        return LossGradient {
            value,
            gradient: Vec::new(),
        };
    }

    // dL/dt_i, pushed back through t_a = (p_b - p_a) + (p_c - p_a).
    let upstream: Vec<Vector3<f64>> = normalized
        .iter()
        .zip(&count)
        .map(|(t, &n)| t * (2.0 / (components * n.max(1.0))))
        .collect();

    let mut gradient = vec![Vector3::zeros(); vertex_count];
    for &[f0, f1, f2] in faces {
        let (f0, f1, f2) = (f0 as usize, f1 as usize, f2 as usize);
        for (a, b, c) in [(f0, f1, f2), (f1, f2, f0), (f2, f0, f1)] {
            let g = upstream[a];
            gradient[a] -= g * 2.0;
            gradient[b] += g;
            gradient[c] += g;
        }
    }

    LossGradient { value, gradient }
}

/// Per-vertex sums of neighbor differences and neighbor counts.
///
/// Every face adds into three vertex slots; slots are only ever summed, so
/// the result is independent of face order up to floating-point rounding.
fn scatter_umbrella(positions: &[Point3<f64>], faces: &[[u32; 3]]) -> (Vec<Vector3<f64>>, Vec<f64>) {
    #[cfg(feature = "parallel")]
    if faces.len() >= PARALLEL_FACE_THRESHOLD {
        let n = positions.len();
        return faces
            .par_iter()
            .fold(
                || (vec![Vector3::zeros(); n], vec![0.0; n]),
                |(mut term, mut count), face| {
                    scatter_face(positions, face, &mut term, &mut count);
                    (term, count)
                },
            )
            .reduce(
                || (vec![Vector3::zeros(); n], vec![0.0; n]),
                |(mut ta, mut ca), (tb, cb)| {
                    for (a, b) in ta.iter_mut().zip(tb) {
                        *a += b;
                    }
                    for (a, b) in ca.iter_mut().zip(cb) {
                        *a += b;
                    }
                    (ta, ca)
                },
            );
    }

    let mut term = vec![Vector3::zeros(); positions.len()];
    let mut count = vec![0.0; positions.len()];
    for face in faces {
        scatter_face(positions, face, &mut term, &mut count);
    }
    (term, count)
}

#[inline]
fn scatter_face(
    positions: &[Point3<f64>],
    &[f0, f1, f2]: &[u32; 3],
    term: &mut [Vector3<f64>],
    count: &mut [f64],
) {
    let (i0, i1, i2) = (f0 as usize, f1 as usize, f2 as usize);
    let (v0, v1, v2) = (positions[i0], positions[i1], positions[i2]);

    term[i0] += (v1 - v0) + (v2 - v0);
    term[i1] += (v0 - v1) + (v2 - v1);
    term[i2] += (v0 - v2) + (v1 - v2);

    count[i0] += 2.0;
    count[i1] += 2.0;
    count[i2] += 2.0;
}
