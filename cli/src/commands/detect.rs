//! `mule-buildpack detect` command.

use std::path::PathBuf;

use clap::Args;
use mule_buildpack_runtime::layout::DEPLOY_MARKER;
use mule_buildpack_runtime::Provisioner;

#[derive(Args)]
pub struct DetectArgs {
    /// Application build directory
    pub build_dir: PathBuf,
}

pub async fn execute(args: DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !Provisioner::supports(&args.build_dir) {
        return Err(format!(
            "{} not found in {}",
            DEPLOY_MARKER,
            args.build_dir.display()
        )
        .into());
    }

    println!("mule");
    Ok(())
}
