//! mesh info command - display mesh statistics and edge structure.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_regularize::{Mesh, avg_edge_length};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<BoundsInfo>,
    surface_area: f64,
    edges: EdgeInfo,
    /// Absent when the topology is not regularizable.
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_edge_length: Option<f64>,
    has_normals: bool,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

#[derive(Serialize)]
struct EdgeInfo {
    unique: usize,
    interior: usize,
    boundary: usize,
    non_manifold: usize,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let report = mesh.topology_report();
    let bounds = mesh.bounds().map(|(min, max)| {
        let dims = max - min;
        BoundsInfo {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
            dimensions: [dims.x, dims.y, dims.z],
        }
    });

    let info = MeshInfo {
        path: input.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        bounds,
        surface_area: mesh.surface_area(),
        edges: EdgeInfo {
            unique: report.unique_edge_count,
            interior: report.interior_edge_count,
            boundary: report.boundary_edge_count,
            non_manifold: report.non_manifold_edge_count,
        },
        avg_edge_length: avg_edge_length(&mesh).ok(),
        has_normals: mesh.vertices.iter().any(|v| v.normal.is_some()),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Mesh Information".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!("  {}: {}", "Vertices".cyan(), info.vertices);
                println!("  {}: {}", "Faces".cyan(), info.faces);

                if let Some(ref b) = info.bounds {
                    println!(
                        "  {}: {:.4} x {:.4} x {:.4}",
                        "Dimensions".cyan(),
                        b.dimensions[0],
                        b.dimensions[1],
                        b.dimensions[2]
                    );
                    println!(
                        "  {}: ({:.4}, {:.4}, {:.4})",
                        "Min bounds".cyan(),
                        b.min[0],
                        b.min[1],
                        b.min[2]
                    );
                    println!(
                        "  {}: ({:.4}, {:.4}, {:.4})",
                        "Max bounds".cyan(),
                        b.max[0],
                        b.max[1],
                        b.max[2]
                    );
                }
                println!("  {}: {:.6}", "Surface area".cyan(), info.surface_area);

                println!(
                    "  {}: {} ({} interior, {} boundary)",
                    "Edges".cyan(),
                    info.edges.unique,
                    info.edges.interior,
                    info.edges.boundary
                );
                if info.edges.non_manifold > 0 {
                    println!(
                        "  {}: {}",
                        "Non-manifold edges".red(),
                        info.edges.non_manifold
                    );
                }
                match info.avg_edge_length {
                    Some(len) => println!("  {}: {:.6}", "Avg edge length".cyan(), len),
                    None => println!(
                        "  {}: {}",
                        "Avg edge length".cyan(),
                        "n/a (run `mesh validate`)".yellow()
                    ),
                }
                println!(
                    "  {}: {}",
                    "Has normals".cyan(),
                    if info.has_normals { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}
