//! Mule Buildpack Runtime - provisioning implementation.
//!
//! Installs a Mule runtime into the droplet sandbox, deploys the application
//! into it, tunes memory, and registers the instance with the management
//! platform.

pub mod archive;
pub mod command;
pub mod deploy;
pub mod download;
pub mod exec;
pub mod layout;
pub mod memory;
pub mod pipeline;
pub mod platform;
pub mod registration;

// Re-export common types
pub use archive::install_archive;
pub use command::ShellCommand;
pub use deploy::{deploy_application, overlay_resources, DeployStats};
pub use download::Downloader;
pub use exec::{CommandOutput, CommandRunner, ShellRunner};
pub use layout::DropletLayout;
pub use memory::{configure_memory, MemoryBudget};
pub use pipeline::{CompileReport, Provisioner, RegistrationReport};
pub use platform::{PlatformClient, RemovalOutcome};
pub use registration::{RegistrationOrchestrator, RegistrationOutcome};

/// Runtime crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
