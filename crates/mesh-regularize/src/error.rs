//! Error types for mesh regularization with rich diagnostics.
//!
//! This module provides error handling with:
//! - Machine-readable error codes for programmatic handling
//! - Rich context (which vertex, which face, which edge)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `MESH-XXXX`:
//! - `MESH-1xxx`: I/O errors (file reading, writing, parsing)
//! - `MESH-2xxx`: Validation errors (topology, coordinates)
//! - `MESH-4xxx`: Format and buffer errors (unsupported formats, bad image buffers, bad parameters)
//!
//! Numerical degeneracies (zero-length edges, zero-area faces) are not errors:
//! the evaluators guard them and carry on.
//!
//! # Example
//!
//! ```
//! use mesh_regularize::{ErrorCode, MeshError};
//!
//! let err = MeshError::invalid_vertex_index(5, 100, 50);
//! assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
//! assert_eq!(err.code().as_str(), "MESH-2001");
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Machine-readable error codes for mesh operations.
///
/// Codes follow the pattern `MESH-XXXX` where:
/// - 1xxx = I/O errors
/// - 2xxx = Validation errors
/// - 4xxx = Format and buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// MESH-1001: Failed to read file
    IoRead = 1001,
    /// MESH-1002: Failed to write file
    IoWrite = 1002,
    /// MESH-1003: Failed to parse file format
    ParseError = 1003,

    // Validation errors (2xxx)
    /// MESH-2001: Face references invalid vertex index
    InvalidVertexIndex = 2001,
    /// MESH-2002: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2002,
    /// MESH-2003: Mesh has no vertices or faces
    EmptyMesh = 2003,
    /// MESH-2004: Invalid mesh topology
    InvalidTopology = 2004,
    /// MESH-2005: Face repeats a vertex index
    DegenerateFace = 2005,
    /// MESH-2006: Edge shared by more than two faces
    NonManifoldEdge = 2006,

    // Format errors (4xxx)
    /// MESH-4001: Unsupported file format
    UnsupportedFormat = 4001,
    /// MESH-4003: Image buffer has the wrong shape
    InvalidBuffer = 4003,
    /// MESH-4004: Parameter outside its valid range
    InvalidParameter = 4004,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "MESH-1001",
            ErrorCode::IoWrite => "MESH-1002",
            ErrorCode::ParseError => "MESH-1003",
            ErrorCode::InvalidVertexIndex => "MESH-2001",
            ErrorCode::InvalidCoordinate => "MESH-2002",
            ErrorCode::EmptyMesh => "MESH-2003",
            ErrorCode::InvalidTopology => "MESH-2004",
            ErrorCode::DegenerateFace => "MESH-2005",
            ErrorCode::NonManifoldEdge => "MESH-2006",
            ErrorCode::UnsupportedFormat => "MESH-4001",
            ErrorCode::InvalidBuffer => "MESH-4003",
            ErrorCode::InvalidParameter => "MESH-4004",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for mesh errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Re-export the file from the original software with different settings.
    ReexportFile { format: Option<String> },
    /// Clean up the mesh topology before evaluating regularizers.
    FixTopology { operations: Vec<String> },
    /// Use a different file format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Check the original mesh for issues.
    CheckSourceMesh { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Skip the evaluation for this input.
    SkipEvaluation { reason: String },
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ReexportFile { format } => {
                if let Some(fmt) = format {
                    write!(f, "Try re-exporting the mesh as {}", fmt)
                } else {
                    write!(f, "Try re-exporting the mesh")
                }
            }
            RecoverySuggestion::FixTopology { operations } => {
                write!(f, "Fix the topology first: {}", operations.join(", "))
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::CheckSourceMesh { checks } => {
                write!(f, "Check the source mesh for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::SkipEvaluation { reason } => {
                write!(f, "Skip this evaluation: {}", reason)
            }
        }
    }
}

/// Location information for mesh errors.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Error at a specific vertex.
    Vertex { index: usize },
    /// Error at a specific face.
    Face {
        index: usize,
        vertices: Option<[u32; 3]>,
    },
    /// Error at a specific edge.
    Edge { vertex_a: u32, vertex_b: u32 },
    /// Error in a file.
    File { path: PathBuf },
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index } => write!(f, "vertex {}", index),
            MeshLocation::Face { index, vertices } => {
                if let Some([a, b, c]) = vertices {
                    write!(f, "face {} with vertices [{}, {}, {}]", index, a, b, c)
                } else {
                    write!(f, "face {}", index)
                }
            }
            MeshLocation::Edge { vertex_a, vertex_b } => {
                write!(f, "edge between vertices {} and {}", vertex_a, vertex_b)
            }
            MeshLocation::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur while loading, validating or regularizing a mesh.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}")]
    #[diagnostic(
        code(mesh::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}")]
    #[diagnostic(
        code(mesh::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing mesh file format.
    #[error("failed to parse mesh from {path}: {details}")]
    #[diagnostic(
        code(mesh::parse::error),
        help("The file may be corrupted or truncated. Try re-exporting it.")
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported mesh format: {extension:?}")]
    #[diagnostic(code(mesh::format::unsupported), help("Supported formats: OBJ, PLY"))]
    UnsupportedFormat { extension: Option<String> },

    /// Empty mesh (no vertices or faces).
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(mesh::validation::empty),
        help("Regularizers need at least one face. Skip the evaluation when the face count is zero.")
    )]
    EmptyMesh { details: String },

    /// Invalid mesh topology.
    #[error("invalid mesh topology: {details}")]
    #[diagnostic(code(mesh::validation::topology))]
    InvalidTopology { details: String },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Remove faces with invalid vertex references or check the mesh export settings.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(mesh::validation::coordinate),
        help("A previous optimization step may have diverged. Check the learning rate.")
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// Face uses the same vertex more than once.
    #[error("degenerate face {face_index}: vertices [{}, {}, {}] repeat an index", vertices[0], vertices[1], vertices[2])]
    #[diagnostic(
        code(mesh::validation::degenerate_face),
        help("Collapse or remove faces that reference the same vertex twice.")
    )]
    DegenerateFace {
        face_index: usize,
        vertices: [u32; 3],
    },

    /// Edge shared by more than two faces.
    #[error("non-manifold edge ({vertex_a}, {vertex_b}) is shared by {face_count} faces")]
    #[diagnostic(
        code(mesh::validation::non_manifold),
        help("Edge-to-face maps and Laplacians require every edge to touch at most two faces.")
    )]
    NonManifoldEdge {
        vertex_a: u32,
        vertex_b: u32,
        face_count: usize,
    },

    /// Image buffer has an unexpected shape.
    #[error("invalid render buffer: {details}")]
    #[diagnostic(code(mesh::buffer::invalid))]
    InvalidBuffer { details: String },

    /// Parameter outside its valid range.
    #[error("invalid parameter `{name}`: {details}")]
    #[diagnostic(code(mesh::parameter::invalid))]
    InvalidParameter { name: &'static str, details: String },
}

impl MeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::IoRead { .. } => ErrorCode::IoRead,
            MeshError::IoWrite { .. } => ErrorCode::IoWrite,
            MeshError::ParseError { .. } => ErrorCode::ParseError,
            MeshError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            MeshError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            MeshError::InvalidTopology { .. } => ErrorCode::InvalidTopology,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            MeshError::DegenerateFace { .. } => ErrorCode::DegenerateFace,
            MeshError::NonManifoldEdge { .. } => ErrorCode::NonManifoldEdge,
            MeshError::InvalidBuffer { .. } => ErrorCode::InvalidBuffer,
            MeshError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeshError::IoRead { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            MeshError::IoWrite { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            MeshError::ParseError { .. } => RecoverySuggestion::ReexportFile {
                format: Some("OBJ".into()),
            },
            MeshError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["OBJ".into(), "PLY".into()],
            },
            MeshError::EmptyMesh { .. } => RecoverySuggestion::SkipEvaluation {
                reason: "the mesh has no faces".into(),
            },
            MeshError::InvalidTopology { .. } => RecoverySuggestion::FixTopology {
                operations: vec!["remove invalid faces".into()],
            },
            MeshError::InvalidVertexIndex { .. } => RecoverySuggestion::FixTopology {
                operations: vec!["remove faces with out-of-range indices".into()],
            },
            MeshError::InvalidCoordinate { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["coordinate values".into(), "optimizer divergence".into()],
            },
            MeshError::DegenerateFace { .. } => RecoverySuggestion::FixTopology {
                operations: vec!["remove degenerate faces".into()],
            },
            MeshError::NonManifoldEdge { .. } => RecoverySuggestion::FixTopology {
                operations: vec!["split non-manifold edges".into()],
            },
            MeshError::InvalidBuffer { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["buffer dimensions".into(), "alpha channel present".into()],
            },
            MeshError::InvalidParameter { name, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![((*name).into(), "use a finite, non-negative value".into())],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<MeshLocation> {
        match self {
            MeshError::InvalidVertexIndex { face_index, .. } => Some(MeshLocation::Face {
                index: *face_index,
                vertices: None,
            }),
            MeshError::DegenerateFace {
                face_index,
                vertices,
            } => Some(MeshLocation::Face {
                index: *face_index,
                vertices: Some(*vertices),
            }),
            MeshError::NonManifoldEdge {
                vertex_a, vertex_b, ..
            } => Some(MeshLocation::Edge {
                vertex_a: *vertex_a,
                vertex_b: *vertex_b,
            }),
            MeshError::InvalidCoordinate { vertex_index, .. } => Some(MeshLocation::Vertex {
                index: *vertex_index,
            }),
            MeshError::ParseError { path, .. }
            | MeshError::IoRead { path, .. }
            | MeshError::IoWrite { path, .. } => Some(MeshLocation::File { path: path.clone() }),
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        MeshError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face_index: usize, vertex_index: u32, vertex_count: usize) -> Self {
        MeshError::InvalidVertexIndex {
            face_index,
            vertex_index,
            vertex_count,
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        MeshError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create an InvalidTopology error.
    pub fn invalid_topology(details: impl Into<String>) -> Self {
        MeshError::InvalidTopology {
            details: details.into(),
        }
    }

    /// Create an InvalidBuffer error.
    pub fn invalid_buffer(details: impl Into<String>) -> Self {
        MeshError::InvalidBuffer {
            details: details.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        MeshError::InvalidParameter {
            name,
            details: details.into(),
        }
    }
}

/// Validation issues that can be collected during mesh validation.
///
/// Unlike `MeshError`, these are collected without stopping validation.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// Face references a vertex index that doesn't exist.
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },
    /// Vertex has NaN coordinate.
    NaNCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
    },
    /// Vertex has infinite coordinate.
    InfiniteCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },
    /// Face repeats a vertex index.
    DegenerateFace { face_index: usize },
    /// Edge shared by more than 2 faces.
    NonManifoldEdge {
        vertex_a: u32,
        vertex_b: u32,
        face_count: usize,
    },
}

impl ValidationIssue {
    /// Returns a severity level for the issue.
    pub fn severity(&self) -> IssueSeverity {
        match self {
            ValidationIssue::InvalidVertexIndex { .. } => IssueSeverity::Error,
            ValidationIssue::NaNCoordinate { .. } => IssueSeverity::Error,
            ValidationIssue::InfiniteCoordinate { .. } => IssueSeverity::Error,
            ValidationIssue::DegenerateFace { .. } => IssueSeverity::Error,
            ValidationIssue::NonManifoldEdge { .. } => IssueSeverity::Error,
        }
    }

    /// Returns an error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationIssue::InvalidVertexIndex { .. } => "MESH-2001",
            ValidationIssue::NaNCoordinate { .. } => "MESH-2002",
            ValidationIssue::InfiniteCoordinate { .. } => "MESH-2002",
            ValidationIssue::DegenerateFace { .. } => "MESH-2005",
            ValidationIssue::NonManifoldEdge { .. } => "MESH-2006",
        }
    }
}

/// Severity levels for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    /// Informational, no action needed.
    Info,
    /// Warning, mesh may have issues.
    Warning,
    /// Error, mesh is invalid.
    Error,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::InvalidVertexIndex {
                face_index,
                vertex_index,
                vertex_count,
            } => write!(
                f,
                "face {} references vertex {}, but mesh only has {} vertices",
                face_index, vertex_index, vertex_count
            ),
            ValidationIssue::NaNCoordinate {
                vertex_index,
                coordinate,
            } => write!(f, "vertex {} has NaN {} coordinate", vertex_index, coordinate),
            ValidationIssue::InfiniteCoordinate {
                vertex_index,
                coordinate,
                value,
            } => write!(
                f,
                "vertex {} has infinite {} coordinate ({})",
                vertex_index, coordinate, value
            ),
            ValidationIssue::DegenerateFace { face_index } => {
                write!(f, "face {} repeats a vertex index", face_index)
            }
            ValidationIssue::NonManifoldEdge {
                vertex_a,
                vertex_b,
                face_count,
            } => write!(
                f,
                "edge ({}, {}) is non-manifold (shared by {} faces)",
                vertex_a, vertex_b, face_count
            ),
        }
    }
}
