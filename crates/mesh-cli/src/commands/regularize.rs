//! mesh regularize command - evaluate every mesh regularizer.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_regularize::{Mesh, Regularizer, RegularizerLosses, RegularizerWeights};
use serde::Serialize;
use tracing::debug;

use crate::{Cli, OutputFormat, WeightPreset, output};

#[derive(Serialize)]
struct RegularizeResult {
    path: String,
    weights: RegularizerWeights,
    losses: RegularizerLosses,
}

fn select_weights(preset: WeightPreset, laplacian_only: bool) -> RegularizerWeights {
    if laplacian_only {
        return RegularizerWeights::laplacian_only();
    }
    match preset {
        WeightPreset::Unit => RegularizerWeights::default(),
        WeightPreset::Geometry => RegularizerWeights::geometry(),
    }
}

pub fn run(input: &Path, preset: WeightPreset, laplacian_only: bool, cli: &Cli) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let weights = select_weights(preset, laplacian_only);
    debug!(?weights, laplacian_only, "Evaluating mesh regularizers");
    let losses = Regularizer::new(weights)
        .evaluate(&mesh)
        .with_context(|| format!("Failed to evaluate regularizers on {:?}", input))?;

    let result = RegularizeResult {
        path: input.display().to_string(),
        weights,
        losses,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Regularizer Losses".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                for (name, value) in result.losses.terms() {
                    if name == "total" {
                        println!("  {}: {:.6}", "Weighted total".green().bold(), value);
                    } else {
                        println!("  {}: {:.6}", name.cyan(), value);
                    }
                }
            }
        }
    }

    Ok(())
}
