//! Tracing helpers for regularizer evaluation.
//!
//! Targets used by this crate:
//!
//! - `mesh_regularize::timing`: operation durations
//! - `mesh_regularize::mesh_state`: mesh dimensions and counts
//! - `mesh_regularize::losses`: per-term loss values
//! - `mesh_regularize::validation`: topology gate outcomes
//! - `mesh_regularize::io`: file reads and writes
//!
//! Enable them with e.g. `RUST_LOG=mesh_regularize::losses=debug`.

use std::path::Path;
use std::time::Instant;

use tracing::{Span, debug, info, trace, warn};

use crate::Mesh;
use crate::validate::TopologyReport;

/// Times an operation inside its own span and logs the duration on drop.
///
/// ```rust,ignore
/// use mesh_regularize::tracing_ext::OperationTimer;
///
/// fn evaluate() {
///     let _timer = OperationTimer::new("evaluate");
///     // ...
/// } // logs elapsed_ms here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    pub fn new(name: &'static str) -> Self {
        Self::start(name, tracing::info_span!("mesh_operation", operation = name))
    }

    /// Timer whose span carries the mesh size.
    pub fn with_context(name: &'static str, face_count: usize, vertex_count: usize) -> Self {
        Self::start(
            name,
            tracing::info_span!(
                "mesh_operation",
                operation = name,
                faces = face_count,
                vertices = vertex_count
            ),
        )
    }

    fn start(name: &'static str, span: Span) -> Self {
        span.in_scope(|| {
            trace!(target: "mesh_regularize::timing", operation = name, "Starting operation");
        });
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        self.span.in_scope(|| {
            debug!(
                target: "mesh_regularize::timing",
                operation = self.name,
                elapsed_ms = format!("{:.3}", elapsed_ms),
                "Operation completed"
            );
        });
    }
}

/// Log mesh size, extent and topology fingerprint at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "mesh_regularize::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        fingerprint = format!("{:016x}", mesh.topology_fingerprint()),
        dimensions = format!("{:.3e} x {:.3e} x {:.3e}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log named loss terms, one event per term, plus a summary.
///
/// Non-finite values are logged at warn level since they would poison the
/// optimizer.
pub fn log_loss_terms(context: &str, terms: &[(&str, f64)]) {
    for &(name, value) in terms {
        if value.is_finite() {
            trace!(
                target: "mesh_regularize::losses",
                context = context,
                term = name,
                value = value,
                "Loss term"
            );
        } else {
            warn!(
                target: "mesh_regularize::losses",
                context = context,
                term = name,
                value = value,
                "Non-finite loss term"
            );
        }
    }

    let summary: Vec<String> = terms
        .iter()
        .map(|(name, value)| format!("{}={:.6}", name, value))
        .collect();
    debug!(
        target: "mesh_regularize::losses",
        context = context,
        terms = summary.join(" "),
        "Loss breakdown"
    );
}

/// Log whether the regularizers would accept a mesh's topology.
pub fn log_topology_report(report: &TopologyReport) {
    if report.is_regularizable() {
        info!(
            target: "mesh_regularize::validation",
            vertices = report.vertex_count,
            faces = report.face_count,
            edges = report.unique_edge_count,
            watertight = report.is_watertight(),
            "Topology accepted"
        );
    } else {
        warn!(
            target: "mesh_regularize::validation",
            faces = report.face_count,
            non_manifold_edges = report.non_manifold_edge_count,
            degenerate_faces = report.degenerate_face_count,
            "Topology rejected by regularizers"
        );
    }
}

/// Log a mesh file read or write.
pub fn log_io_operation(operation: &str, path: &Path, format: &str, success: bool) {
    if success {
        info!(
            target: "mesh_regularize::io",
            operation = operation,
            path = %path.display(),
            format = format,
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "mesh_regularize::io",
            operation = operation,
            path = %path.display(),
            format = format,
            "I/O operation failed"
        );
    }
}
