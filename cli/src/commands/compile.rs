//! `mule-buildpack compile` command.

use std::path::PathBuf;

use clap::Args;
use mule_buildpack_runtime::Provisioner;

use super::load_config;

#[derive(Args)]
pub struct CompileArgs {
    /// Application build directory
    pub build_dir: PathBuf,

    /// Buildpack cache directory
    pub cache_dir: PathBuf,

    /// YAML configuration file (environment variables take precedence)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Files to overlay onto the installed runtime [default: <buildpack>/resources]
    #[arg(long)]
    pub resources: Option<PathBuf>,
}

pub async fn execute(args: CompileArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;
    let executable = std::env::current_exe()?;

    let mut provisioner = Provisioner::new(&args.build_dir, &args.cache_dir, config)?
        .with_buildpack_binary(&executable);
    if let Some(resources) = args.resources.or_else(|| bundled_resources(&executable)) {
        provisioner = provisioner.with_resources(resources);
    }

    let report = provisioner.compile().await?;

    tracing::info!(
        entries = report.entries_extracted,
        overlaid = report.resources_overlaid,
        files = report.deploy.files_copied,
        skipped = report.deploy.skipped_existing,
        user_libraries = report.user_libraries.len(),
        policies = report.policies.len(),
        registration = ?report.registration,
        heap_mb = report.memory_budget.map(|b| b.megabytes()),
        "Droplet ready"
    );
    Ok(())
}

/// `resources/` next to the buildpack's `bin/` directory, if present.
fn bundled_resources(executable: &std::path::Path) -> Option<PathBuf> {
    let dir = executable.parent()?.parent()?.join("resources");
    dir.is_dir().then_some(dir)
}
