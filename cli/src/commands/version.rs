//! `mule-buildpack version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("mule-buildpack version {}", mule_buildpack_core::VERSION);
    Ok(())
}
