//! CLI command definitions and dispatch.

mod compile;
mod detect;
mod launch;
mod release;
mod version;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mule_buildpack_core::BuildpackConfig;

/// Buildpack for Mule runtime applications.
#[derive(Parser)]
#[command(name = "mule-buildpack", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Check whether an application is a Mule application
    Detect(detect::DetectArgs),
    /// Install the runtime and deploy the application into the droplet
    Compile(compile::CompileArgs),
    /// Print the release YAML with the start command
    Release(release::ReleaseArgs),
    /// Register with the platform, then start the runtime
    Launch(launch::LaunchArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Detect(args) => detect::execute(args).await,
        Command::Compile(args) => compile::execute(args).await,
        Command::Release(args) => release::execute(args).await,
        Command::Launch(args) => launch::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Configuration from an optional YAML file plus the process environment.
pub(crate) fn load_config(file: Option<&Path>) -> Result<BuildpackConfig, Box<dyn std::error::Error>> {
    let config = BuildpackConfig::from_process_env(file)?;
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}

/// Cache directory used outside of compile.
pub(crate) fn scratch_cache() -> PathBuf {
    std::env::temp_dir().join("mule-buildpack-cache")
}
