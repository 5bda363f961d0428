//! Mesh file I/O for OBJ and PLY.
//!
//! Loaders triangulate polygons, merge every object in the file into one
//! [`Mesh`], and run [`validate_mesh_data`] before returning. Writers emit
//! triangles only, with coordinates in shortest round-trip form, so a saved
//! mesh reloads with bit-identical positions.
//!
//! The OBJ reader keeps only vertices some face references, ordered by
//! first reference. PLY keeps every vertex in file order and is the format
//! to use when indices must survive a round trip.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::tracing_ext::{log_io_operation, log_mesh_stats};
use crate::validate::{ValidationOptions, validate_mesh_data};
use crate::{Mesh, Vertex};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Obj,
    Ply,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "obj" => Some(MeshFormat::Obj),
                "ply" => Some(MeshFormat::Ply),
                _ => None,
            })
    }

    pub fn name(&self) -> &'static str {
        match self {
            MeshFormat::Obj => "obj",
            MeshFormat::Ply => "ply",
        }
    }

    fn require(path: &Path) -> MeshResult<Self> {
        Self::from_path(path).ok_or_else(|| MeshError::UnsupportedFormat {
            extension: path.extension().and_then(|e| e.to_str()).map(String::from),
        })
    }
}

/// Load a mesh from file, auto-detecting format from extension.
pub fn load_mesh(path: &Path) -> MeshResult<Mesh> {
    let format = MeshFormat::require(path)?;
    info!("Loading mesh from {:?} (format: {:?})", path, format);

    let loaded = match format {
        MeshFormat::Obj => load_obj(path),
        MeshFormat::Ply => load_ply(path),
    };
    log_io_operation("load", path, format.name(), loaded.is_ok());
    let mesh = loaded?;

    log_mesh_stats(&mesh, "loaded");
    if let Some((min, max)) = mesh.bounds() {
        let dims = max - min;
        if dims.x.max(dims.y).max(dims.z) == 0.0 {
            warn!("Mesh has zero extent; every vertex is at the same point");
        }
    }

    if mesh.vertices.is_empty() || mesh.faces.is_empty() {
        return Err(MeshError::empty_mesh(format!(
            "{} has no vertices or faces",
            path.display()
        )));
    }

    validate_mesh_data(&mesh, &ValidationOptions::default())?;

    Ok(mesh)
}

/// Save a mesh, picking the format from the file extension.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    let format = MeshFormat::require(path)?;
    let saved = match format {
        MeshFormat::Obj => save_obj(mesh, path),
        MeshFormat::Ply => save_ply_ascii(mesh, path),
    };
    log_io_operation("save", path, format.name(), saved.is_ok());
    saved
}

fn load_obj(path: &Path) -> MeshResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| MeshError::parse_error(path, format!("OBJ parse error: {}", e)))?;

    let mut mesh = Mesh::new();
    for model in &models {
        let offset = mesh.vertices.len() as u32;
        let obj = &model.mesh;
        let has_normals = obj.normals.len() == obj.positions.len();

        for (i, p) in obj.positions.chunks_exact(3).enumerate() {
            let mut vertex = Vertex::from_coords(p[0], p[1], p[2]);
            if has_normals {
                let n = &obj.normals[3 * i..3 * i + 3];
                vertex.normal = Some(Vector3::new(n[0], n[1], n[2]));
            }
            mesh.vertices.push(vertex);
        }
        for tri in obj.indices.chunks_exact(3) {
            mesh.faces
                .push([tri[0] + offset, tri[1] + offset, tri[2] + offset]);
        }
        debug!(
            model = %model.name,
            vertices = obj.positions.len() / 3,
            faces = obj.indices.len() / 3,
            "OBJ model merged"
        );
    }

    Ok(mesh)
}

fn load_ply(path: &Path) -> MeshResult<Mesh> {
    use ply_rs::parser::Parser;
    use ply_rs::ply::{DefaultElement, Property};

    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let ply = Parser::<DefaultElement>::new()
        .read_ply(&mut reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        mesh.vertices.reserve(vertices.len());
        for element in vertices {
            let mut vertex = Vertex::from_coords(
                ply_float(element.get("x"), "x", path)?,
                ply_float(element.get("y"), "y", path)?,
                ply_float(element.get("z"), "z", path)?,
            );
            if let (Ok(nx), Ok(ny), Ok(nz)) = (
                ply_float(element.get("nx"), "nx", path),
                ply_float(element.get("ny"), "ny", path),
                ply_float(element.get("nz"), "nz", path),
            ) {
                vertex.normal = Some(Vector3::new(nx, ny, nz));
            }
            mesh.vertices.push(vertex);
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for (face_index, element) in faces.iter().enumerate() {
            let indices: Vec<i64> = match element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"))
            {
                Some(Property::ListInt(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUInt(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListShort(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUShort(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUChar(v)) => v.iter().map(|&i| i as i64).collect(),
                _ => {
                    return Err(MeshError::parse_error(
                        path,
                        format!("face {} has no vertex index list", face_index),
                    ));
                }
            };
            if indices.iter().any(|&i| i < 0 || i > u32::MAX as i64) {
                return Err(MeshError::parse_error(
                    path,
                    format!("face {} has an out-of-range index", face_index),
                ));
            }
            // Fan triangulation for polygons
            for k in 1..indices.len().saturating_sub(1) {
                mesh.faces.push([
                    indices[0] as u32,
                    indices[k] as u32,
                    indices[k + 1] as u32,
                ]);
            }
        }
    }

    debug!(
        "PLY loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );

    Ok(mesh)
}

fn ply_float(prop: Option<&ply_rs::ply::Property>, name: &str, path: &Path) -> MeshResult<f64> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        _ => Err(MeshError::parse_error(
            path,
            format!("missing or invalid PLY property: {}", name),
        )),
    }
}

/// Write a mesh as Wavefront OBJ.
pub fn save_obj(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    info!("Saving mesh to {:?} (OBJ format)", path);

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| MeshError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?}",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );
    Ok(())
}

fn write_obj<W: Write>(mesh: &Mesh, writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "# Vertices: {}", mesh.vertices.len())?;
    writeln!(writer, "# Faces: {}", mesh.faces.len())?;

    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());

    for v in &mesh.vertices {
        writeln!(
            writer,
            "v {} {} {}",
            v.position.x, v.position.y, v.position.z
        )?;
    }
    if has_normals {
        for v in &mesh.vertices {
            let n = v.normal.unwrap_or_else(Vector3::zeros);
            writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }

    for face in &mesh.faces {
        // OBJ uses 1-based indexing
        let [a, b, c] = face.map(|i| i + 1);
        if has_normals {
            writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
        } else {
            writeln!(writer, "f {a} {b} {c}")?;
        }
    }
    Ok(())
}

/// Write a mesh as ASCII PLY with double-precision coordinates.
pub fn save_ply_ascii(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    info!("Saving mesh to {:?} (PLY ASCII format)", path);

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    let scalar = |name: &str| {
        PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Double))
    };

    let mut vertex_def = ElementDef::new("vertex".to_string());
    let vertex_props: &[&str] = if has_normals {
        &["x", "y", "z", "nx", "ny", "nz"]
    } else {
        &["x", "y", "z"]
    };
    for name in vertex_props {
        vertex_def.properties.add(scalar(name));
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::UInt),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let vertices_payload = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Double(v.position.x));
            element.insert("y".to_string(), Property::Double(v.position.y));
            element.insert("z".to_string(), Property::Double(v.position.z));
            if has_normals {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                element.insert("nx".to_string(), Property::Double(n.x));
                element.insert("ny".to_string(), Property::Double(n.y));
                element.insert("nz".to_string(), Property::Double(n.z));
            }
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let faces_payload = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            element.insert(
                "vertex_indices".to_string(),
                Property::ListUInt(face.to_vec()),
            );
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces_payload);

    ply.make_consistent().map_err(|e| {
        MeshError::io_write(
            path,
            std::io::Error::other(format!("PLY consistency error: {:?}", e)),
        )
    })?;

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .and_then(|_| writer.flush())
        .map_err(|e| MeshError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?} (PLY ASCII)",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{icosahedron, perturbed, tetrahedron};
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            MeshFormat::from_path(Path::new("mesh.obj")),
            Some(MeshFormat::Obj)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("MESH.OBJ")),
            Some(MeshFormat::Obj)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("scan.ply")),
            Some(MeshFormat::Ply)
        );
        assert_eq!(MeshFormat::from_path(Path::new("part.stl")), None);
        assert_eq!(MeshFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_mesh(Path::new("part.stl")).unwrap_err();
        assert!(matches!(
            err,
            MeshError::UnsupportedFormat { extension: Some(ref e) } if e == "stl"
        ));
        let err = save_mesh(&tetrahedron(), Path::new("part.3mf")).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_load_obj_triangulates_quads() {
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        writeln!(file, "v 0 0 0").unwrap();
        writeln!(file, "v 1 0 0").unwrap();
        writeln!(file, "v 1 1 0").unwrap();
        writeln!(file, "v 0 1 0").unwrap();
        writeln!(file, "f 1 2 3 4").unwrap();
        file.flush().unwrap();

        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert_relative_eq!(mesh.surface_area(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_load_obj_rejects_out_of_range_face() {
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        writeln!(file, "v 0 0 0").unwrap();
        writeln!(file, "v 1 0 0").unwrap();
        writeln!(file, "v 0 1 0").unwrap();
        writeln!(file, "f 1 2 9").unwrap();
        file.flush().unwrap();

        assert!(load_mesh(file.path()).is_err());
    }

    #[test]
    fn test_load_empty_obj() {
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        writeln!(file, "# nothing here").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_mesh(file.path()),
            Err(MeshError::EmptyMesh { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_mesh(&dir.path().join("absent.ply")).unwrap_err();
        assert!(matches!(err, MeshError::IoRead { .. }));
    }

    #[test]
    fn test_save_and_reload_obj() {
        let mesh = perturbed(&icosahedron());
        let file = NamedTempFile::with_suffix(".obj").unwrap();
        save_mesh(&mesh, file.path()).unwrap();

        let reloaded = load_mesh(file.path()).unwrap();
        assert_eq!(reloaded.vertex_count(), mesh.vertex_count());
        assert_eq!(reloaded.face_count(), mesh.face_count());
        assert_relative_eq!(
            reloaded.surface_area(),
            mesh.surface_area(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_obj_keeps_full_precision_at_small_scale() {
        let mut mesh = tetrahedron();
        mesh.vertices[0].position.x = 0.123456789;
        mesh.scale(1e-7);

        let file = NamedTempFile::with_suffix(".obj").unwrap();
        save_mesh(&mesh, file.path()).unwrap();
        let reloaded = load_mesh(file.path()).unwrap();

        // Reordered by first reference, but every position is exact
        assert_eq!(reloaded.vertex_count(), 4);
        for v in &mesh.vertices {
            assert!(
                reloaded.vertices.iter().any(|r| r.position == v.position),
                "{:?} lost on reload",
                v.position
            );
        }
    }

    #[test]
    fn test_ply_round_trip_is_bit_exact_with_isolated_vertex() {
        let mut mesh = perturbed(&tetrahedron());
        mesh.vertices[0].position.x = 0.123456789;
        mesh.scale(1e-7);
        mesh.vertices.push(Vertex::from_coords(1.0 / 3.0, -2.5e-9, 7.0));

        let file = NamedTempFile::with_suffix(".ply").unwrap();
        save_mesh(&mesh, file.path()).unwrap();
        let reloaded = load_mesh(file.path()).unwrap();

        assert_eq!(reloaded.vertex_count(), 5);
        assert_eq!(reloaded.faces, mesh.faces);
        for (a, b) in reloaded.vertices.iter().zip(&mesh.vertices) {
            for (ra, rb) in a.position.coords.iter().zip(b.position.coords.iter()) {
                assert_eq!(ra.to_bits(), rb.to_bits());
            }
        }
    }

    #[test]
    fn test_save_and_reload_ply_preserves_order() {
        let mut mesh = perturbed(&tetrahedron());
        mesh.vertices[2].normal = Some(Vector3::new(0.0, 0.0, 1.0));

        let file = NamedTempFile::with_suffix(".ply").unwrap();
        save_mesh(&mesh, file.path()).unwrap();
        let reloaded = load_mesh(file.path()).unwrap();

        assert_eq!(reloaded.faces, mesh.faces);
        for (a, b) in reloaded.vertices.iter().zip(&mesh.vertices) {
            assert_relative_eq!(a.position, b.position, epsilon = 1e-12);
        }
        assert_eq!(reloaded.vertices[2].normal, Some(Vector3::new(0.0, 0.0, 1.0)));
        assert_eq!(reloaded.vertices[0].normal, Some(Vector3::zeros()));
    }

    #[test]
    fn test_load_ply_fan_triangulates_polygons() {
        let mut file = NamedTempFile::with_suffix(".ply").unwrap();
        write!(
            file,
            "ply\nformat ascii 1.0\nelement vertex 5\nproperty float x\nproperty float y\nproperty float z\n\
             element face 1\nproperty list uchar int vertex_indices\nend_header\n\
             0 0 0\n1 0 0\n1 1 0\n0.5 1.5 0\n0 1 0\n5 0 1 2 3 4\n"
        )
        .unwrap();
        file.flush().unwrap();

        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]);
    }
}
