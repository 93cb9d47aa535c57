//! Droplet filesystem layout.
//!
//! Defines where the runtime, the deployed application and the supporting
//! files live inside the application directory.

use std::path::{Path, PathBuf};

/// Directory holding everything the buildpack installs; excluded from deployment.
pub const BUILDPACK_DIR: &str = ".java-buildpack";

/// Sandbox directory name, beneath [`BUILDPACK_DIR`].
pub const SANDBOX_DIR: &str = "mule";

/// Default JRE directory name, beneath [`BUILDPACK_DIR`].
pub const JRE_DIR: &str = "open_jdk_jre";

/// File whose presence at the application root selects this buildpack.
pub const DEPLOY_MARKER: &str = "mule-deploy.properties";

/// Native registration executable, relative to the sandbox.
pub const AMC_SETUP: &str = "bin/amc_setup";

/// Runtime launcher, relative to the sandbox.
pub const LAUNCHER: &str = "bin/mule";

/// Buildpack executable copied into the sandbox for launch-time registration.
pub const BUILDPACK_BINARY: &str = "bin/mule-buildpack";

/// Droplet layout rooted at the application directory.
#[derive(Debug, Clone)]
pub struct DropletLayout {
    root: PathBuf,
}

impl DropletLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Application root (the uploaded source tree).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runtime sandbox.
    pub fn sandbox(&self) -> PathBuf {
        self.root.join(BUILDPACK_DIR).join(SANDBOX_DIR)
    }

    /// Deployed application directory.
    pub fn app_dir(&self) -> PathBuf {
        self.sandbox().join("apps").join("app")
    }

    /// Runtime wrapper configuration file.
    pub fn wrapper_conf(&self) -> PathBuf {
        self.sandbox().join("conf").join("wrapper.conf")
    }

    pub fn amc_setup(&self) -> PathBuf {
        self.sandbox().join(AMC_SETUP)
    }

    pub fn launcher(&self) -> PathBuf {
        self.sandbox().join(LAUNCHER)
    }

    pub fn buildpack_binary(&self) -> PathBuf {
        self.sandbox().join(BUILDPACK_BINARY)
    }

    pub fn user_lib_dir(&self) -> PathBuf {
        self.sandbox().join("lib").join("user")
    }

    pub fn policies_dir(&self) -> PathBuf {
        self.sandbox().join("policies")
    }

    /// JRE installed alongside the runtime.
    pub fn default_java_home(&self) -> PathBuf {
        self.root.join(BUILDPACK_DIR).join(JRE_DIR)
    }

    /// Deploy marker file at the application root.
    pub fn deploy_marker(&self) -> PathBuf {
        self.root.join(DEPLOY_MARKER)
    }
}

/// Paths as seen by the start command, relative to `$PWD` in the container.
pub mod release {
    use super::*;

    pub fn sandbox() -> String {
        format!("$PWD/{}/{}", BUILDPACK_DIR, SANDBOX_DIR)
    }

    pub fn java_home() -> String {
        format!("$PWD/{}/{}", BUILDPACK_DIR, JRE_DIR)
    }
}
