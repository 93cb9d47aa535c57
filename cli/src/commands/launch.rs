//! `mule-buildpack launch` command.
//!
//! Runs inside the container: registers the instance with the platform,
//! then replaces itself with the runtime launcher.

use std::path::PathBuf;

use clap::Args;
use mule_buildpack_runtime::Provisioner;

use super::{load_config, scratch_cache};

#[derive(Args)]
pub struct LaunchArgs {
    /// Droplet application directory
    #[arg(long, default_value = ".")]
    pub app_dir: PathBuf,

    /// YAML configuration file (environment variables take precedence)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn execute(args: LaunchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;
    let app_dir = std::fs::canonicalize(&args.app_dir)?;
    let provisioner = Provisioner::new(&app_dir, scratch_cache(), config)?;

    let report = provisioner.register().await?;
    tracing::info!(registration = ?report, "Starting runtime");

    start(&provisioner.start_command().render())
}

#[cfg(unix)]
fn start(command_line: &str) -> Result<(), Box<dyn std::error::Error>> {
    // Only returns on failure.
    Err(mule_buildpack_runtime::exec::exec_shell(command_line).into())
}

#[cfg(not(unix))]
fn start(command_line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .status()?;
    std::process::exit(status.code().unwrap_or(1));
}
