//! Mesh-space regularization losses.
//!
//! Every evaluator validates topology first and returns a finite value for
//! any valid input: zero-length edges and zero-area faces are guarded, not
//! reported.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::Mesh;
use crate::adjacency::{BoundaryPolicy, EdgeFaceMap, compute_edge_to_face_mapping, compute_edges};
use crate::error::{MeshError, MeshResult};
use crate::validate::validate_topology;

/// Dot products at or above this are not penalized (about 18 degrees).
pub const NORMAL_CONSISTENCY_THRESHOLD: f64 = 0.95;

/// Scale applied to the hinge penalty. Caps a single edge's penalty below 1.
pub const NORMAL_CONSISTENCY_SCALE: f64 = 0.5;

/// Squared norms at or below this normalize to the zero vector.
pub const SAFE_NORMALIZE_EPS: f64 = 1e-20;

/// A scalar loss and its derivative with respect to each vertex position.
///
/// `gradient` is empty when only the value was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossGradient {
    pub value: f64,
    pub gradient: Vec<Vector3<f64>>,
}

impl LossGradient {
    /// Add `weight * other` into `self`, growing the gradient if needed.
    pub fn accumulate(&mut self, weight: f64, other: &LossGradient) {
        self.value += weight * other.value;
        if self.gradient.len() < other.gradient.len() {
            self.gradient.resize(other.gradient.len(), Vector3::zeros());
        }
        for (acc, g) in self.gradient.iter_mut().zip(&other.gradient) {
            *acc += g * weight;
        }
    }
}

/// Unit vector, or zero when `v` is too short to normalize.
#[inline]
pub fn safe_normalize(v: &Vector3<f64>) -> Vector3<f64> {
    let len_sq = v.norm_squared();
    if len_sq > SAFE_NORMALIZE_EPS {
        v / len_sq.sqrt()
    } else {
        Vector3::zeros()
    }
}

/// Per-face unit normals (`(v1 - v0) x (v2 - v0)`), zero for degenerate faces.
pub fn face_normals(mesh: &Mesh) -> MeshResult<Vec<Vector3<f64>>> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    let positions = mesh.positions();
    Ok(mesh
        .faces
        .iter()
        .map(|face| safe_normalize(&face_cross(&positions, face)))
        .collect())
}

#[inline]
fn face_cross(positions: &[Point3<f64>], &[f0, f1, f2]: &[u32; 3]) -> Vector3<f64> {
    let v0 = positions[f0 as usize];
    let e1 = positions[f1 as usize] - v0;
    let e2 = positions[f2 as usize] - v0;
    e1.cross(&e2)
}

/// Mean Euclidean length over the per-face edge list.
///
/// Interior edges are counted once per incident face, so this is the mean
/// over [`compute_edges`] output rather than over unique edges. Reversing
/// face winding does not change it.
pub fn avg_edge_length(mesh: &Mesh) -> MeshResult<f64> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    Ok(edge_length_loss(&mesh.positions(), &compute_edges(&mesh.faces), false).value)
}

/// [`avg_edge_length`] with its gradient.
pub fn avg_edge_length_with_gradient(mesh: &Mesh) -> MeshResult<LossGradient> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    Ok(edge_length_loss(
        &mesh.positions(),
        &compute_edges(&mesh.faces),
        true,
    ))
}

pub(crate) fn edge_length_loss(
    positions: &[Point3<f64>],
    edges: &[[u32; 2]],
    want_gradient: bool,
) -> LossGradient {
    let n = edges.len().max(1) as f64;
    let mut value = 0.0;
    let mut gradient = if want_gradient {
        vec![Vector3::zeros(); positions.len()]
    } else {
        Vec::new()
    };

    for &[a, b] in edges {
        let d = positions[a as usize] - positions[b as usize];
        let len = d.norm();
        value += len;
        if want_gradient && len > 0.0 {
            let g = d / (len * n);
            gradient[a as usize] += g;
            gradient[b as usize] -= g;
        }
    }

    LossGradient {
        value: value / n,
        gradient,
    }
}

/// Hinge penalty on adjacent face normals.
///
/// For each interior edge (boundary edges are excluded) with face normals
/// `n0`, `n1`: `d = clamp(n0 . n1, -1, 1)`, penalty
/// `relu(0.95 - d) * 0.5`. Returns the mean penalty, or zero for a mesh with
/// no interior edges. Coplanar neighbours score zero; a single edge never
/// scores more than 0.975.
pub fn normal_consistency(mesh: &Mesh) -> MeshResult<f64> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    let map = compute_edge_to_face_mapping(&mesh.faces, BoundaryPolicy::Exclude)?;
    Ok(normal_consistency_loss(&mesh.positions(), &mesh.faces, &map, false).value)
}

/// [`normal_consistency`] with its gradient. Degenerate faces pass no gradient.
pub fn normal_consistency_with_gradient(mesh: &Mesh) -> MeshResult<LossGradient> {
    validate_topology(mesh.vertex_count(), &mesh.faces)?;
    let map = compute_edge_to_face_mapping(&mesh.faces, BoundaryPolicy::Exclude)?;
    Ok(normal_consistency_loss(
        &mesh.positions(),
        &mesh.faces,
        &map,
        true,
    ))
}

pub(crate) fn normal_consistency_loss(
    positions: &[Point3<f64>],
    faces: &[[u32; 3]],
    map: &EdgeFaceMap,
    want_gradient: bool,
) -> LossGradient {
    if map.is_empty() {
        return LossGradient {
            value: 0.0,
            gradient: if want_gradient {
                vec![Vector3::zeros(); positions.len()]
            } else {
                Vec::new()
            },
        };
    }

    let crosses: Vec<Vector3<f64>> = faces.iter().map(|f| face_cross(positions, f)).collect();
    let normals: Vec<Vector3<f64>> = crosses.iter().map(safe_normalize).collect();
    let n = map.len() as f64;

    let mut value = 0.0;
    let mut normal_grad = if want_gradient {
        vec![Vector3::zeros(); faces.len()]
    } else {
        Vec::new()
    };

    for [f0, f1] in map.face_pairs() {
        let (n0, n1) = (normals[f0 as usize], normals[f1 as usize]);
        let raw = n0.dot(&n1);
        let d = raw.clamp(-1.0, 1.0);
        let penalty = (NORMAL_CONSISTENCY_THRESHOLD - d).max(0.0) * NORMAL_CONSISTENCY_SCALE;
        value += penalty.abs();

        let active = d < NORMAL_CONSISTENCY_THRESHOLD && raw > -1.0 && raw < 1.0;
        if want_gradient && active {
            let dd = -NORMAL_CONSISTENCY_SCALE / n;
            normal_grad[f0 as usize] += n1 * dd;
            normal_grad[f1 as usize] += n0 * dd;
        }
    }

    trace!(edges = map.len(), "normal consistency evaluated");

    if !want_gradient {
        return LossGradient {
            value: value / n,
            gradient: Vec::new(),
        };
    }

    let mut gradient = vec![Vector3::zeros(); positions.len()];
    for (face_idx, &[i0, i1, i2]) in faces.iter().enumerate() {
        let c = crosses[face_idx];
        let len_sq = c.norm_squared();
        if len_sq <= SAFE_NORMALIZE_EPS {
            continue;
        }
        let len = len_sq.sqrt();
        let unit = c / len;
        let gn = normal_grad[face_idx];
        // Project out the radial part: d(c/|c|)/dc = (I - u u^T) / |c|.
        let gc = (gn - unit * unit.dot(&gn)) / len;

        let v0 = positions[i0 as usize];
        let e1 = positions[i1 as usize] - v0;
        let e2 = positions[i2 as usize] - v0;
        let ge1 = e2.cross(&gc);
        let ge2 = gc.cross(&e1);

        gradient[i1 as usize] += ge1;
        gradient[i2 as usize] += ge2;
        gradient[i0 as usize] -= ge1 + ge2;
    }

    LossGradient {
        value: value / n,
        gradient,
    }
}

/// Weights for the mesh regularizers. Zero skips a term entirely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizerWeights {
    /// Weight of [`avg_edge_length`].
    pub edge_length: f64,
    /// Weight of [`laplacian_smooth_loss`](crate::laplacian_smooth_loss).
    pub laplacian_smooth: f64,
    /// Weight of [`laplace_regularizer_const`](crate::laplace_regularizer_const).
    pub laplacian_const: f64,
    /// Weight of [`normal_consistency`].
    pub normal_consistency: f64,
}

impl Default for RegularizerWeights {
    /// Every term at weight one, so the total is the plain sum.
    fn default() -> Self {
        Self {
            edge_length: 1.0,
            laplacian_smooth: 1.0,
            laplacian_const: 1.0,
            normal_consistency: 1.0,
        }
    }
}

impl RegularizerWeights {
    /// All terms disabled.
    pub fn none() -> Self {
        Self {
            edge_length: 0.0,
            laplacian_smooth: 0.0,
            laplacian_const: 0.0,
            normal_consistency: 0.0,
        }
    }

    /// Preset for geometry training: favours the degree-normalized Laplacian
    /// and a light normal-consistency pull.
    pub fn geometry() -> Self {
        Self {
            edge_length: 0.0,
            laplacian_smooth: 0.0,
            laplacian_const: 0.1,
            normal_consistency: 0.01,
        }
    }

    /// Only the two Laplacian terms, unweighted.
    pub fn laplacian_only() -> Self {
        Self {
            laplacian_smooth: 1.0,
            laplacian_const: 1.0,
            ..Self::none()
        }
    }

    /// True when every weight is zero.
    pub fn is_disabled(&self) -> bool {
        self.named().iter().all(|(_, w)| *w == 0.0)
    }

    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> MeshResult<()> {
        for (name, weight) in self.named() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(MeshError::invalid_parameter(
                    name,
                    format!("weight must be finite and non-negative, got {}", weight),
                ));
            }
        }
        Ok(())
    }

    fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("edge_length", self.edge_length),
            ("laplacian_smooth", self.laplacian_smooth),
            ("laplacian_const", self.laplacian_const),
            ("normal_consistency", self.normal_consistency),
        ]
    }
}

/// Unweighted value of each evaluated term plus the weighted total.
///
/// Terms whose weight was zero are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegularizerLosses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laplacian_smooth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laplacian_const: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_consistency: Option<f64>,
    pub total: f64,
}

impl RegularizerLosses {
    /// Evaluated terms in a fixed order, total last.
    pub fn terms(&self) -> Vec<(&'static str, f64)> {
        let mut terms: Vec<(&'static str, f64)> = [
            ("edge_length", self.edge_length),
            ("laplacian_smooth", self.laplacian_smooth),
            ("laplacian_const", self.laplacian_const),
            ("normal_consistency", self.normal_consistency),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect();
        terms.push(("total", self.total));
        terms
    }
}
