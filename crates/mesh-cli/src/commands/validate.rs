//! mesh validate command - check the mesh against the regularizer topology gate.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_regularize::{Mesh, log_topology_report};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ValidationResult {
    path: String,
    valid: bool,
    watertight: bool,
    manifold: bool,
    issues: Vec<IssueInfo>,
}

#[derive(Serialize)]
struct IssueInfo {
    category: String,
    message: String,
    severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let report = mesh.topology_report();
    log_topology_report(&report);
    let mut issues = Vec::new();

    // The first error the regularizers would raise, with its location
    if let Err(e) = mesh.validate_topology() {
        let message = match e.location() {
            Some(location) => format!("{} ({})", e, location),
            None => e.to_string(),
        };
        issues.push(IssueInfo {
            category: "topology".to_string(),
            message,
            severity: "error".to_string(),
            code: Some(e.code().to_string()),
        });
    }

    if report.non_manifold_edge_count > 0 {
        issues.push(IssueInfo {
            category: "topology".to_string(),
            message: format!(
                "{} edges are shared by more than two faces",
                report.non_manifold_edge_count
            ),
            severity: "error".to_string(),
            code: None,
        });
    }
    if report.degenerate_face_count > 0 {
        issues.push(IssueInfo {
            category: "faces".to_string(),
            message: format!(
                "{} faces repeat a vertex index",
                report.degenerate_face_count
            ),
            severity: "error".to_string(),
            code: None,
        });
    }
    if !report.is_watertight() {
        issues.push(IssueInfo {
            category: "boundary".to_string(),
            message: format!(
                "{} boundary edges are left out of normal consistency",
                report.boundary_edge_count
            ),
            severity: "warning".to_string(),
            code: None,
        });
    }
    if report.isolated_vertex_count > 0 {
        issues.push(IssueInfo {
            category: "vertices".to_string(),
            message: format!(
                "{} vertices belong to no face",
                report.isolated_vertex_count
            ),
            severity: "info".to_string(),
            code: None,
        });
    }

    let result = ValidationResult {
        path: input.display().to_string(),
        valid: report.is_regularizable() && issues.iter().all(|i| i.severity != "error"),
        watertight: report.is_watertight(),
        manifold: report.is_manifold(),
        issues,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Validation Report".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());

                if result.valid {
                    println!("  {}: {}", "Status".cyan(), "Valid".green().bold());
                } else {
                    println!("  {}: {}", "Status".cyan(), "Issues found".red().bold());
                }
                print!("{}", report);

                if !result.issues.is_empty() {
                    println!("\n{}", "Issues:".bold());
                    for issue in &result.issues {
                        let icon = match issue.severity.as_str() {
                            "error" => "✗".red(),
                            "warning" => "⚠".yellow(),
                            _ => "ℹ".blue(),
                        };
                        match &issue.code {
                            Some(code) => println!(
                                "  {} [{}] {}: {}",
                                icon, issue.category, code, issue.message
                            ),
                            None => println!("  {} [{}] {}", icon, issue.category, issue.message),
                        }
                    }
                }
            }
        }
    }

    // Exit with error code if invalid
    if !result.valid {
        std::process::exit(1);
    }

    Ok(())
}
