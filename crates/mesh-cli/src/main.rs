//! mesh-cli: Command-line interface for mesh regularization and stage hand-off.
//!
//! Inspect meshes the way the regularizers see them, evaluate every
//! regularization term, and check the artifacts that link a geometry run to
//! its appearance run.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_regularize=info` - Basic operation logging
//! - `RUST_LOG=mesh_regularize::losses=debug` - Per-term loss values
//! - `RUST_LOG=mesh_regularize::timing=debug` - Performance timing
//! - `RUST_LOG=mesh_stage=debug` - Artifact and checkpoint handling
//!
//! # Example
//!
//! ```bash
//! # Regularizer values for an exported mesh
//! mesh regularize data/learned_geo/bunny/step_000500.ply --weights geometry
//!
//! # Which mesh will the appearance run pick up?
//! mesh handoff --root data/learned_geo --run bunny_appearance
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{config, handoff, info, regularize, validate};

/// mesh - Mesh regularizers and stage hand-off from the command line.
#[derive(Parser)]
#[command(name = "mesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh statistics and edge structure
    Info {
        /// Input mesh file
        input: PathBuf,
    },

    /// Evaluate the mesh regularizers
    Regularize {
        /// Input mesh file
        input: PathBuf,

        /// Weight preset
        #[arg(long, default_value = "unit")]
        weights: WeightPreset,

        /// Evaluate only the two Laplacian terms
        #[arg(long)]
        laplacian_only: bool,
    },

    /// Check that every regularizer accepts the mesh topology
    Validate {
        /// Input mesh file
        input: PathBuf,
    },

    /// Show and verify the mesh artifact a run hands to stage 2
    Handoff {
        /// Geometry (artifact) root directory
        #[arg(long, default_value = "data/learned_geo")]
        root: PathBuf,

        /// Run name; its geometry key selects the artifact
        #[arg(long)]
        run: String,
    },

    /// Validate a stage configuration file and print it with defaults filled in
    Config {
        /// Stage configuration (TOML)
        input: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WeightPreset {
    /// Every term at weight one
    Unit,
    /// Geometry-stage preset
    Geometry,
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_regularize=info,mesh_stage=info",
            2 => "mesh_regularize=debug,mesh_stage=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn print_error(e: &anyhow::Error) {
    if let Some(mesh_err) = e.downcast_ref::<mesh_regularize::MeshError>() {
        eprintln!("{}: {}", "Error".red().bold(), mesh_err);
        eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            mesh_err.recovery_suggestion()
        );
        if let Some(location) = mesh_err.location() {
            eprintln!("  {}: {}", "Location".yellow(), location);
        }
    } else if let Some(stage_err) = e.downcast_ref::<mesh_stage::StageError>() {
        eprintln!("{}: {}", "Error".red().bold(), stage_err);
        eprintln!("  {}: {}", "Code".cyan(), stage_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            stage_err.recovery_suggestion()
        );
    } else {
        eprintln!("{}: {}", "Error".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("  {}: {}", "Caused by".yellow(), cause);
        }
    }
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input } => info::run(input, &cli),
        Commands::Regularize {
            input,
            weights,
            laplacian_only,
        } => regularize::run(input, *weights, *laplacian_only, &cli),
        Commands::Validate { input } => validate::run(input, &cli),
        Commands::Handoff { root, run } => handoff::run(root, run, &cli),
        Commands::Config { input } => config::run(input, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            print_error(e);
        }
        std::process::exit(1);
    }

    Ok(())
}
