//! mesh handoff command - show and verify a stage-1 mesh artifact.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_stage::{ArtifactManifest, MeshArtifactStore, geometry_key};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct HandoffInfo {
    run: String,
    geometry_key: String,
    artifact: String,
    manifest: ArtifactManifest,
    verified: bool,
}

pub fn run(root: &Path, run: &str, cli: &Cli) -> Result<()> {
    let store = MeshArtifactStore::new(root);
    // Missing, tampered and unparsable artifacts all surface as StageError
    let loaded = store.consume(run)?;

    let info = HandoffInfo {
        run: run.to_string(),
        geometry_key: geometry_key(run).to_string(),
        artifact: loaded.path.display().to_string(),
        manifest: loaded.manifest,
        verified: true,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Stage Hand-off".bold().underline());
                println!("  {}: {}", "Run".cyan(), info.run);
                println!("  {}: {}", "Geometry key".cyan(), info.geometry_key);
                println!("  {}: {}", "Produced by".cyan(), info.manifest.run);
                println!("  {}: {}", "Step".cyan(), info.manifest.step);
                println!("  {}: {}", "Artifact".cyan(), info.artifact);
                println!(
                    "  {}: {} vertices, {} faces",
                    "Mesh".cyan(),
                    info.manifest.vertex_count,
                    info.manifest.face_count
                );
                println!(
                    "  {}: {:016x}",
                    "Fingerprint".cyan(),
                    info.manifest.fingerprint
                );
                println!("  {}: {}", "Status".cyan(), "Verified".green().bold());
            }
        }
    }

    Ok(())
}
