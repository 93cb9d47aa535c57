//! Mule Buildpack Core - Foundational Types
//!
//! Error and configuration types shared by the provisioning runtime and the
//! buildpack entrypoints.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    BuildpackConfig, ExtrasConfig, InstanceConfig, MemoryPolicy, PlatformConfig,
    RegistrationPhase, RuntimeConfig, TimeoutConfig,
};
pub use error::{BuildpackError, Result};

/// Buildpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
