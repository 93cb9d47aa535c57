//! `mule-buildpack release` command.

use std::path::PathBuf;

use clap::Args;
use mule_buildpack_runtime::Provisioner;
use serde::Serialize;

use super::{load_config, scratch_cache};

#[derive(Args)]
pub struct ReleaseArgs {
    /// Application build directory
    pub build_dir: PathBuf,

    /// YAML configuration file (environment variables take precedence)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct Release {
    default_process_types: ProcessTypes,
}

#[derive(Serialize)]
struct ProcessTypes {
    web: String,
}

pub async fn execute(args: ReleaseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;
    let provisioner = Provisioner::new(&args.build_dir, scratch_cache(), config)?;

    let release = Release {
        default_process_types: ProcessTypes {
            web: provisioner.release().render(),
        },
    };
    print!("{}", serde_yaml::to_string(&release)?);
    Ok(())
}
