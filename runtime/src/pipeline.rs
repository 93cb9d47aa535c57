//! Provisioning pipeline.
//!
//! `compile` turns an uploaded application tree into a droplet with a
//! runtime installed; `release` produces the command that starts it.

use crate::archive::install_archive;
use crate::command::ShellCommand;
use crate::deploy::{deploy_application, overlay_resources, DeployStats};
use crate::download::Downloader;
use crate::exec::{CommandRunner, ShellRunner};
use crate::layout::{self, DropletLayout, BUILDPACK_DIR, DEPLOY_MARKER};
use crate::memory::{configure_memory, MemoryBudget};
use crate::registration::{RegistrationOrchestrator, RegistrationOutcome};
use mule_buildpack_core::error::{BuildpackError, Result};
use mule_buildpack_core::{BuildpackConfig, RegistrationPhase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Heap size expression evaluated by the shell when the limit is only known
/// at container start.
const DEFERRED_HEAP: &str = "$((${MEMORY_LIMIT%?}/2))";

/// What happened to platform registration during compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationReport {
    /// Runs at container start instead
    Deferred,
    Completed(RegistrationOutcome),
    /// Failed without aborting the build
    Failed(String),
}

/// Summary of a compile run.
#[derive(Debug, Clone)]
pub struct CompileReport {
    pub entries_extracted: usize,
    pub resources_overlaid: usize,
    pub deploy: DeployStats,
    pub user_libraries: Vec<PathBuf>,
    pub policies: Vec<PathBuf>,
    pub registration: RegistrationReport,
    pub memory_budget: Option<MemoryBudget>,
}

/// Provisions one application droplet.
pub struct Provisioner {
    layout: DropletLayout,
    config: BuildpackConfig,
    downloader: Downloader,
    resources_dir: Option<PathBuf>,
    buildpack_binary: Option<PathBuf>,
    runner: Arc<dyn CommandRunner>,
}

impl Provisioner {
    /// Create a provisioner for the application at `app_root`, caching
    /// downloads in `cache_dir`.
    pub fn new(
        app_root: impl AsRef<Path>,
        cache_dir: impl Into<PathBuf>,
        config: BuildpackConfig,
    ) -> Result<Self> {
        let downloader = Downloader::new(cache_dir, config.timeouts.http())?;
        let runner = Arc::new(ShellRunner::new(config.timeouts.command()));

        Ok(Self {
            layout: DropletLayout::new(app_root),
            config,
            downloader,
            resources_dir: None,
            buildpack_binary: None,
            runner,
        })
    }

    /// Files copied over the installed runtime.
    pub fn with_resources(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources_dir = Some(dir.into());
        self
    }

    /// Executable installed into the sandbox when registration is deferred
    /// to launch.
    pub fn with_buildpack_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.buildpack_binary = Some(path.into());
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Whether the application at `app_root` is handled by this buildpack.
    pub fn supports(app_root: &Path) -> bool {
        app_root.join(DEPLOY_MARKER).is_file()
    }

    pub fn layout(&self) -> &DropletLayout {
        &self.layout
    }

    pub fn config(&self) -> &BuildpackConfig {
        &self.config
    }

    /// Run the compile phase.
    ///
    /// Steps run in order and the first fatal error aborts the rest. Nothing
    /// already written is rolled back.
    pub async fn compile(&self) -> Result<CompileReport> {
        let started = Instant::now();
        let sandbox = self.layout.sandbox();
        tracing::info!(
            app = %self.layout.root().display(),
            sandbox = %sandbox.display(),
            version = %self.config.runtime.version,
            "Compiling droplet"
        );

        // 1. Runtime archive
        let step = Instant::now();
        tracing::info!("Expanding runtime");
        let uri = self.config.runtime.uri.as_deref().ok_or_else(|| {
            BuildpackError::Config("runtime archive URI not configured (MULE_RUNTIME_URI)".to_string())
        })?;
        let archive = self.downloader.fetch(uri).await?;
        let entries_extracted = install_archive(&archive, &sandbox)?;
        tracing::info!(
            entries = entries_extracted,
            elapsed_ms = step.elapsed().as_millis() as u64,
            "Installed runtime"
        );

        // 2. Buildpack resources
        let resources_overlaid = match &self.resources_dir {
            Some(dir) => overlay_resources(dir, &sandbox)?,
            None => 0,
        };

        // 3. Application
        let step = Instant::now();
        tracing::info!(target_dir = %self.layout.app_dir().display(), "Deploying application");
        let deploy = deploy_application(self.layout.root(), &self.layout.app_dir(), BUILDPACK_DIR)?;
        tracing::info!(
            files = deploy.files_copied,
            dirs = deploy.dirs_created,
            skipped = deploy.skipped_existing,
            elapsed_ms = step.elapsed().as_millis() as u64,
            "Deployed application"
        );

        // 3.5. User libraries and policies
        let mut user_libraries = Vec::with_capacity(self.config.extras.user_libraries.len());
        for uri in &self.config.extras.user_libraries {
            user_libraries.push(
                self.downloader
                    .fetch_into(uri, &self.layout.user_lib_dir())
                    .await?,
            );
        }
        let mut policies = Vec::with_capacity(self.config.extras.policies.len());
        for uri in &self.config.extras.policies {
            policies.push(
                self.downloader
                    .fetch_into(uri, &self.layout.policies_dir())
                    .await?,
            );
        }

        // 4. Platform registration
        let registration = match self.config.registration_phase {
            RegistrationPhase::Compile => self.register().await?,
            RegistrationPhase::Launch => {
                self.install_buildpack_binary()?;
                RegistrationReport::Deferred
            }
        };

        // 5. Heap sizing
        let memory_budget = configure_memory(
            &self.layout.wrapper_conf(),
            self.config.instance.memory_limit.as_deref(),
            self.config.runtime.effective_memory_policy(),
        );

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compile finished"
        );

        Ok(CompileReport {
            entries_extracted,
            resources_overlaid,
            deploy,
            user_libraries,
            policies,
            registration,
            memory_budget,
        })
    }

    /// Register now. Failures are reported, not raised, unless registration
    /// is required.
    pub async fn register(&self) -> Result<RegistrationReport> {
        let orchestrator =
            RegistrationOrchestrator::new(&self.config, &self.layout, self.runner.clone());

        match orchestrator.register().await {
            Ok(outcome) => {
                tracing::info!(outcome = %outcome, "Platform registration done");
                Ok(RegistrationReport::Completed(outcome))
            }
            Err(e) if self.config.platform.registration_required => Err(e),
            Err(e) => {
                tracing::warn!("Platform registration failed, continuing: {}", e);
                Ok(RegistrationReport::Failed(e.to_string()))
            }
        }
    }

    /// Command registered as the droplet's web process.
    pub fn release(&self) -> ShellCommand {
        match self.config.registration_phase {
            RegistrationPhase::Compile => self.start_command(),
            RegistrationPhase::Launch => self
                .environment(ShellCommand::raw(format!(
                    "$MULE_HOME/{}",
                    layout::BUILDPACK_BINARY
                )))
                .arg("launch"),
        }
    }

    /// Foreground runtime launch with heap and port flags.
    pub fn start_command(&self) -> ShellCommand {
        let heap = self
            .config
            .instance
            .memory_limit
            .as_deref()
            .and_then(|limit| MemoryBudget::from_limit(limit).ok())
            .map(|budget| budget.to_string())
            .unwrap_or_else(|| DEFERRED_HEAP.to_string());

        self.environment(ShellCommand::raw(format!("$MULE_HOME/{}", layout::LAUNCHER)))
            .raw_arg(format!("{}={}", crate::memory::MAX_MEMORY_KEY, heap))
            .raw_arg(format!("{}={}", crate::memory::INIT_MEMORY_KEY, heap))
            .raw_arg("-M-Dmule.agent.enabled=false")
            .raw_arg("-M-Dhttp.port=$PORT")
            .arg("console")
    }

    fn environment(&self, command: ShellCommand) -> ShellCommand {
        let command = command.raw_export("MULE_HOME", layout::release::sandbox());
        let command = match &self.config.instance.java_home {
            Some(java_home) => command.export("JAVA_HOME", java_home),
            None => command.raw_export("JAVA_HOME", layout::release::java_home()),
        };
        command.raw_export("PATH", "$JAVA_HOME/bin:$PATH")
    }

    fn install_buildpack_binary(&self) -> Result<()> {
        let source = self.buildpack_binary.as_deref().ok_or_else(|| {
            BuildpackError::Config(
                "launch-time registration needs the buildpack executable".to_string(),
            )
        })?;
        let dest = self.layout.buildpack_binary();
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &dest).map_err(|e| BuildpackError::Deployment {
            path: dest.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::info!(dest = %dest.display(), "Installed launch-time registration helper");
        Ok(())
    }
}
