//! mesh config command - validate a stage configuration.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_stage::StageConfig;

use crate::{Cli, OutputFormat};

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let config = StageConfig::from_file(input)?;

    if cli.quiet {
        return Ok(());
    }
    match cli.format {
        OutputFormat::Json => println!("{}", config.to_json_string()?),
        OutputFormat::Text => {
            println!("{}", "Stage Configuration".bold().underline());
            println!("  {}: {}", "File".cyan(), input.display());
            println!(
                "  {}: {} ({})",
                "Stage".cyan(),
                config.stage.number(),
                config.stage.name()
            );
            println!("  {}: {}", "Checkpoint".cyan(), config.checkpoint_path().display());
            if config.requires_artifact() {
                println!(
                    "  {}: {}",
                    "Consumes geometry".cyan(),
                    config.geometry_root.join(config.geometry_key()).display()
                );
            }
            println!();
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
