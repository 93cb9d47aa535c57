use thiserror::Error;

/// Buildpack error types
#[derive(Error, Debug)]
pub enum BuildpackError {
    /// Runtime archive unreadable, corrupt, or empty
    #[error("Extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    /// Copying application files into the sandbox failed
    #[error("Deployment failed at {path}: {message}")]
    Deployment { path: String, message: String },

    /// Platform login failed or returned no access token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Target environment absent from the platform's environment list
    #[error("Environment not found: {environment}")]
    EnvironmentNotFound { environment: String },

    /// Native registration executable exited non-zero
    #[error("Registration command failed with exit code {exit_code:?}")]
    RegistrationCommand {
        exit_code: Option<i32>,
        output: String,
    },

    /// Memory limit absent/unparsable or runtime config not patchable
    #[error("Memory configuration skipped: {0}")]
    MemoryConfig(String),

    /// Dependency download failed
    #[error("Download failed: {url} -> {status_code}")]
    Download {
        url: String,
        status_code: u16,
        message: String,
    },

    /// Unexpected response from the management platform
    #[error("Platform error: {status} - {message}")]
    Platform { status: u16, message: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BuildpackError {
    /// Whether this error must stop the container build.
    ///
    /// Filesystem and download failures leave the droplet unstartable;
    /// platform registration and memory tuning failures do not.
    pub fn is_fatal(&self) -> bool {
        match self {
            BuildpackError::Extraction { .. }
            | BuildpackError::Deployment { .. }
            | BuildpackError::Download { .. }
            | BuildpackError::Io(_)
            | BuildpackError::Serialization(_)
            | BuildpackError::Config(_)
            | BuildpackError::Other(_) => true,
            BuildpackError::Authentication(_)
            | BuildpackError::EnvironmentNotFound { .. }
            | BuildpackError::RegistrationCommand { .. }
            | BuildpackError::MemoryConfig(_)
            | BuildpackError::Platform { .. }
            | BuildpackError::Timeout(_) => false,
        }
    }
}

impl From<serde_json::Error> for BuildpackError {
    fn from(err: serde_json::Error) -> Self {
        BuildpackError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BuildpackError {
    fn from(err: serde_yaml::Error) -> Self {
        BuildpackError::Serialization(err.to_string())
    }
}

/// Result type alias for buildpack operations
pub type Result<T> = std::result::Result<T, BuildpackError>;
