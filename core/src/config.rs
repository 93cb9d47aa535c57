//! Buildpack configuration.
//!
//! Every input the provisioning pipeline reads is collected here, assembled
//! from defaults, an optional YAML component file, and an explicit
//! environment map (in that order of precedence, lowest first).

use crate::error::{BuildpackError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Runtime release assumed when none is configured.
pub const DEFAULT_RUNTIME_VERSION: &str = "3.7.0";

/// Buildpack configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildpackConfig {
    /// Runtime archive and release
    pub runtime: RuntimeConfig,

    /// Optional user libraries and policies
    pub extras: ExtrasConfig,

    /// Management platform registration
    pub platform: PlatformConfig,

    /// Values describing the running container instance
    pub instance: InstanceConfig,

    /// When platform registration happens
    pub registration_phase: RegistrationPhase,

    /// Network and subprocess timeouts
    pub timeouts: TimeoutConfig,
}

impl BuildpackConfig {
    /// Load configuration from an optional YAML file, then apply `env` on top.
    pub fn load(file: Option<&Path>, env: &HashMap<String, String>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Load configuration using the current process environment.
    pub fn from_process_env(file: Option<&Path>) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load(file, &env)
    }

    /// Parse a YAML component file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildpackError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Override fields with values present in `env`.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<()> {
        if let Some(uri) = lookup(env, "MULE_RUNTIME_URI") {
            self.runtime.uri = Some(uri);
        }
        if let Some(version) = lookup(env, "MULE_RUNTIME_VERSION") {
            self.runtime.version = version;
        }
        if let Some(policy) = lookup(env, "MULE_MEMORY_POLICY") {
            self.runtime.memory_policy = Some(policy.parse()?);
        }

        if let Some(libs) = lookup(env, "MULE_USER_LIBS") {
            self.extras.user_libraries = split_list(&libs);
        }
        if let Some(policies) = lookup(env, "MULE_POLICIES") {
            self.extras.policies = split_list(&policies);
        }

        if let Some(phase) = lookup(env, "MULE_REGISTER_AT") {
            self.registration_phase = phase.parse()?;
        }

        if let Some(host) = lookup(env, "ANYPOINT_ARM_HOST") {
            self.platform.host = Some(host);
        }
        if let Some(username) = lookup(env, "ANYPOINT_USERNAME") {
            self.platform.username = Some(username);
        }
        if let Some(password) = lookup(env, "ANYPOINT_PASSWORD") {
            self.platform.password = Some(password);
        }
        if let Some(environment) = lookup(env, "ANYPOINT_ENVIRONMENT") {
            self.platform.environment = Some(environment);
        }
        // Any non-empty value selects the on-premises flag set.
        if lookup(env, "ANYPOINT_ARM_ONPREM").is_some() {
            self.platform.on_prem = true;
        }
        if let Some(command) = lookup(env, "ANYPOINT_REGISTRATION_COMMAND") {
            self.platform.registration_command = Some(command);
        }
        if let Some(value) = lookup(env, "ANYPOINT_REGISTRATION_REQUIRED") {
            self.platform.registration_required =
                parse_bool("ANYPOINT_REGISTRATION_REQUIRED", &value)?;
        }
        if let Some(value) = lookup(env, "ANYPOINT_INSECURE_SKIP_TLS_VERIFY") {
            self.platform.insecure_skip_tls_verify =
                parse_bool("ANYPOINT_INSECURE_SKIP_TLS_VERIFY", &value)?;
        }

        if let Some(limit) = lookup(env, "MEMORY_LIMIT") {
            self.instance.memory_limit = Some(limit);
        }
        if let Some(java_home) = lookup(env, "JAVA_HOME") {
            self.instance.java_home = Some(java_home);
        }
        if let Some(index) = lookup(env, "CF_INSTANCE_INDEX") {
            self.instance.instance_index = Some(index);
        }
        if let Some(vcap) = lookup(env, "VCAP_APPLICATION") {
            let application: VcapApplication = serde_json::from_str(&vcap)?;
            if let Some(name) = application.application_name.or(application.name) {
                self.instance.application_name = Some(name);
            }
        }

        if let Some(secs) = lookup(env, "BUILDPACK_HTTP_TIMEOUT_SECS") {
            self.timeouts.http_secs = parse_secs("BUILDPACK_HTTP_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup(env, "BUILDPACK_COMMAND_TIMEOUT_SECS") {
            self.timeouts.command_secs = parse_secs("BUILDPACK_COMMAND_TIMEOUT_SECS", &secs)?;
        }

        Ok(())
    }
}

/// Runtime archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Location of the runtime `.tar.gz` (http(s) URL, `file://` URL or path)
    pub uri: Option<String>,

    /// Runtime release, used to select the memory policy
    pub version: String,

    /// Explicit memory policy (overrides the per-release default)
    pub memory_policy: Option<MemoryPolicy>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            uri: None,
            version: DEFAULT_RUNTIME_VERSION.to_string(),
            memory_policy: None,
        }
    }
}

impl RuntimeConfig {
    /// Memory policy in effect for this runtime.
    pub fn effective_memory_policy(&self) -> MemoryPolicy {
        self.memory_policy
            .unwrap_or_else(|| MemoryPolicy::for_release(&self.version))
    }
}

/// How heap settings are applied to the runtime's `wrapper.conf`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryPolicy {
    /// Rewrite the configured heap values to the computed budget
    Substitute,

    /// Comment out the static heap settings; launch flags take over
    CommentOut,
}

impl MemoryPolicy {
    /// Policy for a runtime release: 3.5.x and 3.6.x ship numeric heap
    /// entries that are rewritten in place; later releases take launch flags.
    pub fn for_release(version: &str) -> Self {
        let mut parts = version.trim().split('.');
        let major = parts.next().and_then(|p| p.parse::<u32>().ok());
        let minor = parts.next().and_then(|p| p.parse::<u32>().ok());
        match (major, minor) {
            (Some(3), Some(5)) | (Some(3), Some(6)) => MemoryPolicy::Substitute,
            _ => MemoryPolicy::CommentOut,
        }
    }
}

impl std::fmt::Display for MemoryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Substitute => write!(f, "substitute"),
            Self::CommentOut => write!(f, "comment-out"),
        }
    }
}

impl std::str::FromStr for MemoryPolicy {
    type Err = BuildpackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "substitute" => Ok(Self::Substitute),
            "comment-out" => Ok(Self::CommentOut),
            other => Err(BuildpackError::Config(format!(
                "unknown memory policy: '{}' (supported: substitute, comment-out)",
                other
            ))),
        }
    }
}

/// Optional artifacts fetched into the sandbox
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrasConfig {
    /// Libraries copied into `lib/user`
    pub user_libraries: Vec<String>,

    /// Offline policies copied into `policies`
    pub policies: Vec<String>,
}

/// Management platform configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Platform host (bare host name or full URL). Registration is skipped when absent.
    pub host: Option<String>,

    /// Login user name
    pub username: Option<String>,

    /// Login password
    pub password: Option<String>,

    /// Target environment name
    pub environment: Option<String>,

    /// Use the on-premises endpoint flag set
    pub on_prem: bool,

    /// Pre-built registration command; bypasses the platform API entirely
    pub registration_command: Option<String>,

    /// Abort the build when registration fails
    pub registration_required: bool,

    /// Disable TLS certificate verification for platform calls
    pub insecure_skip_tls_verify: bool,
}

impl PlatformConfig {
    /// Base URL for API calls. A bare host is addressed over HTTPS.
    pub fn base_url(&self) -> Option<String> {
        self.host.as_deref().map(|host| {
            let host = host.trim_end_matches('/');
            if host.contains("://") {
                host.to_string()
            } else {
                format!("https://{}", host)
            }
        })
    }

    /// Host name without scheme or trailing slash.
    pub fn host_name(&self) -> Option<String> {
        self.host.as_deref().map(|host| {
            let host = host.trim_end_matches('/');
            match host.split_once("://") {
                Some((_, rest)) => rest.to_string(),
                None => host.to_string(),
            }
        })
    }
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .field("on_prem", &self.on_prem)
            .field(
                "registration_command",
                &self.registration_command.as_ref().map(|_| "<redacted>"),
            )
            .field("registration_required", &self.registration_required)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

/// Container instance values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Application name from `VCAP_APPLICATION`
    pub application_name: Option<String>,

    /// Instance index (`CF_INSTANCE_INDEX`)
    pub instance_index: Option<String>,

    /// Java home directory
    pub java_home: Option<String>,

    /// Container memory limit with unit suffix, e.g. `512m`
    pub memory_limit: Option<String>,
}

impl InstanceConfig {
    /// Server name registered on the platform: application name followed by
    /// the instance index.
    pub fn server_name(&self) -> Result<String> {
        let name = self.application_name.as_deref().ok_or_else(|| {
            BuildpackError::Config(
                "application name unknown (VCAP_APPLICATION not set)".to_string(),
            )
        })?;
        Ok(format!(
            "{}{}",
            name,
            self.instance_index.as_deref().unwrap_or("")
        ))
    }
}

/// When platform registration runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationPhase {
    /// During the container build
    #[default]
    Compile,

    /// At container start, before the runtime is launched
    Launch,
}

impl std::str::FromStr for RegistrationPhase {
    type Err = BuildpackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "compile" => Ok(Self::Compile),
            "launch" => Ok(Self::Launch),
            other => Err(BuildpackError::Config(format!(
                "unknown registration phase: '{}' (supported: compile, launch)",
                other
            ))),
        }
    }
}

/// Timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per HTTP request, in seconds
    pub http_secs: u64,

    /// Per subprocess invocation, in seconds
    pub command_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_secs: 30,
            command_secs: 300,
        }
    }
}

impl TimeoutConfig {
    pub fn http(&self) -> Duration {
        Duration::from_secs(self.http_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }
}

/// Subset of `VCAP_APPLICATION` the buildpack reads.
#[derive(Debug, Deserialize)]
struct VcapApplication {
    application_name: Option<String>,
    name: Option<String>,
}

/// Non-empty, trimmed value for `key`.
fn lookup(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(BuildpackError::Config(format!(
            "{} must be true or false, got '{}'",
            key, other
        ))),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(BuildpackError::Config(format!(
            "{} must be a positive number of seconds, got '{}'",
            key, value
        ))),
    }
}
