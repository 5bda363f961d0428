//! Stage-1 to stage-2 mesh hand-off.
//!
//! Hand-off is a two-phase protocol over the filesystem. The geometry stage
//! *produces* a mesh file named after its training step and then replaces
//! the `latest.json` manifest for its geometry key; the appearance stage
//! *consumes* whatever that manifest points at. The manifest is written
//! last through a rename, so a reader sees either the previous artifact or
//! the new one, never a half-written file.
//!
//! Exports are ASCII PLY with double-precision coordinates, which keeps
//! vertex order, unreferenced vertices and every coordinate bit.
//!
//! ```text
//! <root>/<geometry key>/step_000500.ply
//! <root>/<geometry key>/latest.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use mesh_regularize::{Mesh, MeshError, load_mesh, save_mesh};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::geometry_key;
use crate::error::{StageError, StageResult};

/// Manifest file name inside each geometry directory.
pub const MANIFEST_FILE: &str = "latest.json";

/// What the last export of a geometry key contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Run that produced the artifact.
    pub run: String,
    /// Training step at export.
    pub step: u64,
    /// Mesh file name, relative to the manifest's directory.
    pub file: String,
    pub vertex_count: usize,
    pub face_count: usize,
    /// [`content_fingerprint`] of the mesh as read back from `file`.
    pub fingerprint: u64,
}

/// A consumed artifact.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub manifest: ArtifactManifest,
    pub path: PathBuf,
    pub mesh: Mesh,
}

/// Hash of a mesh's topology and exact vertex coordinates.
///
/// Two loads of the same file always agree; any change to a coordinate or
/// an index changes the hash.
pub fn content_fingerprint(mesh: &Mesh) -> u64 {
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = mesh.topology_fingerprint();
    for vertex in &mesh.vertices {
        for c in vertex.position.coords.iter() {
            for b in c.to_bits().to_le_bytes() {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(PRIME);
            }
        }
    }
    hash
}

/// Filesystem store of stage-1 mesh exports.
#[derive(Debug, Clone)]
pub struct MeshArtifactStore {
    root: PathBuf,
}

impl MeshArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every export for `run`'s geometry key.
    pub fn geometry_dir(&self, run: &str) -> PathBuf {
        self.root.join(geometry_key(run))
    }

    pub fn manifest_path(&self, run: &str) -> PathBuf {
        self.geometry_dir(run).join(MANIFEST_FILE)
    }

    /// File name of the export for `step`.
    pub fn artifact_file_name(step: u64) -> String {
        format!("step_{:06}.ply", step)
    }

    /// Phase one: export `mesh` for `run` at `step` and publish it.
    ///
    /// The written file is read back before the manifest moves; an export
    /// that does not reproduce `mesh` exactly is never published.
    pub fn produce(&self, run: &str, step: u64, mesh: &Mesh) -> StageResult<ArtifactManifest> {
        if mesh.is_empty() {
            return Err(MeshError::empty_mesh(format!(
                "refusing to export an empty mesh for run `{}`",
                run
            ))
            .into());
        }

        let dir = self.geometry_dir(run);
        fs::create_dir_all(&dir).map_err(|source| StageError::ArtifactWrite {
            path: dir.clone(),
            source,
        })?;

        let file = Self::artifact_file_name(step);
        let path = dir.join(&file);
        save_mesh(mesh, &path)?;
        let reloaded = load_mesh(&path)?;

        let manifest = ArtifactManifest {
            run: run.to_string(),
            step,
            file,
            vertex_count: reloaded.vertex_count(),
            face_count: reloaded.face_count(),
            fingerprint: content_fingerprint(&reloaded),
        };
        if manifest.vertex_count != mesh.vertex_count() || manifest.face_count != mesh.face_count()
        {
            let _ = fs::remove_file(&path);
            return Err(StageError::artifact_mismatch(
                run,
                format!(
                    "export of {} vertices / {} faces read back as {} / {}",
                    mesh.vertex_count(),
                    mesh.face_count(),
                    manifest.vertex_count,
                    manifest.face_count
                ),
            ));
        }
        if manifest.fingerprint != content_fingerprint(mesh) {
            let _ = fs::remove_file(&path);
            return Err(StageError::artifact_mismatch(
                run,
                format!("export to {} did not read back bit-exactly", path.display()),
            ));
        }

        self.write_manifest(run, &manifest)?;
        info!(
            run = run,
            step = step,
            path = %path.display(),
            vertices = manifest.vertex_count,
            faces = manifest.face_count,
            "Published mesh artifact"
        );
        Ok(manifest)
    }

    /// Current manifest for `run`'s geometry key, if one was published.
    pub fn latest(&self, run: &str) -> StageResult<Option<ArtifactManifest>> {
        let path = self.manifest_path(run);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StageError::InvalidManifest {
                    path,
                    details: e.to_string(),
                });
            }
        };
        let manifest = serde_json::from_str(&text).map_err(|e| StageError::InvalidManifest {
            path: path.clone(),
            details: e.to_string(),
        })?;
        Ok(Some(manifest))
    }

    /// Phase two: load and verify the published artifact for `run`.
    pub fn consume(&self, run: &str) -> StageResult<LoadedArtifact> {
        let manifest = self.latest(run)?.ok_or_else(|| StageError::MissingArtifact {
            run: run.to_string(),
            path: self.manifest_path(run),
        })?;

        let path = self.geometry_dir(run).join(&manifest.file);
        if !path.is_file() {
            return Err(StageError::MissingArtifact {
                run: run.to_string(),
                path,
            });
        }
        debug!(run = run, path = %path.display(), step = manifest.step, "Consuming mesh artifact");

        let mesh = load_mesh(&path)?;
        if mesh.vertex_count() != manifest.vertex_count || mesh.face_count() != manifest.face_count
        {
            return Err(StageError::artifact_mismatch(
                run,
                format!(
                    "manifest lists {} vertices / {} faces, file has {} / {}",
                    manifest.vertex_count,
                    manifest.face_count,
                    mesh.vertex_count(),
                    mesh.face_count()
                ),
            ));
        }
        let fingerprint = content_fingerprint(&mesh);
        if fingerprint != manifest.fingerprint {
            return Err(StageError::artifact_mismatch(
                run,
                format!(
                    "fingerprint {:016x} does not match manifest {:016x}",
                    fingerprint, manifest.fingerprint
                ),
            ));
        }

        info!(
            run = run,
            producer = %manifest.run,
            step = manifest.step,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Loaded mesh artifact"
        );
        Ok(LoadedArtifact {
            manifest,
            path,
            mesh,
        })
    }

    fn write_manifest(&self, run: &str, manifest: &ArtifactManifest) -> StageResult<()> {
        let path = self.manifest_path(run);
        let json = serde_json::to_string_pretty(manifest).map_err(|e| {
            StageError::InvalidManifest {
                path: path.clone(),
                details: e.to_string(),
            }
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StageError::ArtifactWrite {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StageError::ArtifactWrite {
            path: path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_regularize::Vertex;
    use tempfile::TempDir;

    fn tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 0.866, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 0.289, 0.816));
        mesh.faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        mesh
    }

    #[test]
    fn test_fingerprint_tracks_coordinates() {
        let mesh = tetrahedron();
        let mut moved = mesh.clone();
        moved.vertices[3].position.z += 1e-9;
        assert_eq!(content_fingerprint(&mesh), content_fingerprint(&mesh.clone()));
        assert_ne!(content_fingerprint(&mesh), content_fingerprint(&moved));
    }

    #[test]
    fn test_produce_then_consume() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());

        let manifest = store.produce("bunny", 500, &tetrahedron()).unwrap();
        assert_eq!(manifest.file, "step_000500.ply");
        assert_eq!(manifest.vertex_count, 4);
        assert_eq!(manifest.face_count, 4);
        assert!(dir.path().join("bunny").join(MANIFEST_FILE).is_file());

        let loaded = store.consume("bunny_appearance").unwrap();
        assert_eq!(loaded.manifest, manifest);
        assert_eq!(loaded.mesh.face_count(), 4);
    }

    #[test]
    fn test_consume_reproduces_positions_exactly() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());

        let mut mesh = tetrahedron();
        mesh.vertices[0].position.x = 0.123456789;
        mesh.scale(1e-7);
        // Belongs to no face
        mesh.vertices.push(Vertex::from_coords(0.1, 0.2, 0.3));

        store.produce("bunny", 1, &mesh).unwrap();
        let loaded = store.consume("bunny_app").unwrap();

        assert_eq!(loaded.mesh.vertex_count(), 5);
        assert_eq!(loaded.mesh.faces, mesh.faces);
        for (a, b) in loaded.mesh.vertices.iter().zip(&mesh.vertices) {
            assert_eq!(a.position, b.position);
        }
        assert_eq!(loaded.manifest.fingerprint, content_fingerprint(&mesh));
    }

    #[test]
    fn test_latest_tracks_newest_step() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());
        assert!(store.latest("bunny").unwrap().is_none());

        store.produce("bunny", 100, &tetrahedron()).unwrap();
        let mut bigger = tetrahedron();
        bigger.scale(2.0);
        store.produce("bunny", 200, &bigger).unwrap();

        let latest = store.latest("bunny").unwrap().unwrap();
        assert_eq!(latest.step, 200);
        assert!(dir.path().join("bunny").join("step_000100.ply").is_file());
    }

    #[test]
    fn test_consume_missing() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());

        let err = store.consume("bunny_appearance").unwrap_err();
        match err {
            StageError::MissingArtifact { run, path } => {
                assert_eq!(run, "bunny_appearance");
                assert_eq!(path, dir.path().join("bunny").join(MANIFEST_FILE));
            }
            other => panic!("Expected MissingArtifact, got {:?}", other),
        }
    }

    #[test]
    fn test_consume_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());
        let manifest = store.produce("bunny", 1, &tetrahedron()).unwrap();

        let path = dir.path().join("bunny").join(&manifest.file);
        let mut moved = load_mesh(&path).unwrap();
        moved.vertices[1].position.x = 1.5;
        save_mesh(&moved, &path).unwrap();

        let err = store.consume("bunny").unwrap_err();
        assert!(matches!(err, StageError::ArtifactMismatch { .. }));
    }

    #[test]
    fn test_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("bunny")).unwrap();
        std::fs::write(dir.path().join("bunny").join(MANIFEST_FILE), "{").unwrap();

        let err = store.consume("bunny").unwrap_err();
        assert_eq!(err.code().as_str(), "STAGE-2003");
    }

    #[test]
    fn test_empty_mesh_is_not_exported() {
        let dir = TempDir::new().unwrap();
        let store = MeshArtifactStore::new(dir.path());
        let err = store.produce("bunny", 0, &Mesh::new()).unwrap_err();
        assert!(matches!(err, StageError::Mesh(_)));
        assert!(store.latest("bunny").unwrap().is_none());
    }
}
