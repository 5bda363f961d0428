//! Subcommand implementations. Each exposes `run(..., cli) -> anyhow::Result<()>`.

pub mod config;
pub mod handoff;
pub mod info;
pub mod regularize;
pub mod validate;
