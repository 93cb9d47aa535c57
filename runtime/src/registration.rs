//! Platform registration.
//!
//! Registers the runtime instance with the management platform, either by
//! running an operator-supplied command or by fetching a fresh token and
//! invoking the native registration executable.

use crate::command::{with_export, ShellCommand};
use crate::exec::{CommandOutput, CommandRunner};
use crate::layout::DropletLayout;
use crate::platform::{PlatformClient, RemovalOutcome};
use mule_buildpack_core::error::{BuildpackError, Result};
use mule_buildpack_core::{BuildpackConfig, InstanceConfig, PlatformConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How registration concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// No platform host configured
    Skipped,
    /// The operator-supplied command ran successfully
    Override,
    /// The instance was registered under `server_name`
    Registered { server_name: String },
}

impl std::fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => f.write_str("skipped (no platform host)"),
            Self::Override => f.write_str("registered via override command"),
            Self::Registered { server_name } => write!(f, "registered as {}", server_name),
        }
    }
}

/// Drives one registration attempt.
pub struct RegistrationOrchestrator {
    platform: PlatformConfig,
    instance: InstanceConfig,
    java_home: String,
    amc_setup: PathBuf,
    http_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl RegistrationOrchestrator {
    /// Build an orchestrator for the droplet at `layout`.
    ///
    /// `JAVA_HOME` defaults to the JRE installed next to the runtime.
    pub fn new(
        config: &BuildpackConfig,
        layout: &DropletLayout,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let java_home = config
            .instance
            .java_home
            .clone()
            .unwrap_or_else(|| layout.default_java_home().display().to_string());

        Self {
            platform: config.platform.clone(),
            instance: config.instance.clone(),
            java_home,
            amc_setup: layout.amc_setup(),
            http_timeout: config.timeouts.http(),
            runner,
        }
    }

    /// Register the instance.
    ///
    /// A non-zero exit from the registration command is returned as
    /// [`BuildpackError::RegistrationCommand`]; callers decide whether that
    /// aborts provisioning.
    pub async fn register(&self) -> Result<RegistrationOutcome> {
        if let Some(command) = self
            .platform
            .registration_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            tracing::info!("Running operator-supplied registration command");
            self.execute(&with_export("JAVA_HOME", &self.java_home, command))
                .await?;
            return Ok(RegistrationOutcome::Override);
        }

        if self.platform.base_url().is_none() {
            tracing::info!("No platform host configured, skipping registration");
            return Ok(RegistrationOutcome::Skipped);
        }

        let server_name = self.instance.server_name()?;
        let mut client = PlatformClient::new(&self.platform, self.http_timeout)?;
        client.login().await?;

        // Stale registrations from a previous container under the same name
        // would otherwise collide.
        match client.remove_server(&server_name).await {
            Ok(RemovalOutcome::Failed { id, status }) => {
                tracing::warn!(server_id = %id, status, "Continuing with stale registration")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(server_name = %server_name, "Server removal failed: {}", e),
        }

        let Some(token) = client.get_registration_hash().await? else {
            return Ok(RegistrationOutcome::Skipped);
        };

        let command = self.registration_command(&token, &server_name)?;
        tracing::info!(
            server_name = %server_name,
            program = %command.program(),
            on_prem = self.platform.on_prem,
            "Registering runtime with the platform"
        );
        self.execute(&command.render()).await?;

        Ok(RegistrationOutcome::Registered { server_name })
    }

    /// Invocation of the native registration executable.
    pub fn registration_command(&self, token: &str, server_name: &str) -> Result<ShellCommand> {
        let mut command = ShellCommand::new(self.amc_setup.display().to_string())
            .export("JAVA_HOME", &self.java_home);

        if self.platform.on_prem {
            let host = self.platform.host_name().ok_or_else(|| {
                BuildpackError::Config("on-prem registration needs a platform host".to_string())
            })?;
            command = command
                .arg("-A")
                .arg(format!("http://{}:8080/hybrid/api/v1", host))
                .arg("-W")
                .arg(format!("wss://{}:8443/mule", host))
                .arg("-F")
                .arg(format!("https://{}/apiplatform", host))
                .arg("-C")
                .arg(format!("https://{}/accounts", host));
        }

        Ok(command.arg("-H").arg(token).arg(server_name))
    }

    async fn execute(&self, command_line: &str) -> Result<CommandOutput> {
        let output = self.runner.run(command_line).await?;

        for line in output.output.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!(target: "registration", "{}", line);
        }

        if !output.success() {
            return Err(BuildpackError::RegistrationCommand {
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::RecordingRunner;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn base_config(host: Option<String>) -> BuildpackConfig {
        let mut config = BuildpackConfig::default();
        config.platform.host = host;
        config.platform.username = Some("ops".to_string());
        config.platform.password = Some("secret".to_string());
        config.platform.environment = Some("Production".to_string());
        config.instance.application_name = Some("orders".to_string());
        config.instance.instance_index = Some("0".to_string());
        config.instance.java_home = Some("/jre".to_string());
        config
    }

    fn orchestrator(
        config: &BuildpackConfig,
        runner: Arc<RecordingRunner>,
    ) -> RegistrationOrchestrator {
        RegistrationOrchestrator::new(config, &DropletLayout::new("/app"), runner)
    }

    async fn mount_platform(server: &MockServer) {
        mount_platform_listing(server, "orders0").await;
    }

    async fn mount_platform_listing(server: &MockServer, listed: &str) {
        Mock::given(method("POST"))
            .and(path("/accounts/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok" })),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/api/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": { "organization": { "id": "org-1" } }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/api/organizations/org-1/environments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "id": "env-1", "name": "Production" } ]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hybrid/api/v1/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "id": 5, "name": listed } ]
            })))
            .mount(server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/hybrid/api/v1/servers/5"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hybrid/api/v1/servers/registrationToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": "HASH" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_skipped_without_host() {
        let runner = Arc::new(RecordingRunner::new(0));
        let config = base_config(None);

        let outcome = orchestrator(&config, runner.clone()).register().await.unwrap();

        assert_eq!(outcome, RegistrationOutcome::Skipped);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_override_bypasses_platform() {
        let server = MockServer::start().await;
        let runner = Arc::new(RecordingRunner::new(0));
        let mut config = base_config(Some(server.uri()));
        config.platform.registration_command = Some("./amc_setup -H abc srv".to_string());

        let outcome = orchestrator(&config, runner.clone()).register().await.unwrap();

        assert_eq!(outcome, RegistrationOutcome::Override);
        assert_eq!(
            runner.commands(),
            vec!["export JAVA_HOME=/jre && ./amc_setup -H abc srv"]
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cloud_registration_flow() {
        let server = MockServer::start().await;
        mount_platform(&server).await;
        let runner = Arc::new(RecordingRunner::new(0));
        let config = base_config(Some(server.uri()));

        let outcome = orchestrator(&config, runner.clone()).register().await.unwrap();

        assert_eq!(
            outcome,
            RegistrationOutcome::Registered {
                server_name: "orders0".to_string()
            }
        );
        assert_eq!(
            runner.commands(),
            vec!["export JAVA_HOME=/jre && /app/.java-buildpack/mule/bin/amc_setup -H HASH orders0"]
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let server = MockServer::start().await;
        mount_platform(&server).await;
        let runner = Arc::new(RecordingRunner::new(2));
        let config = base_config(Some(server.uri()));

        let err = orchestrator(&config, runner.clone())
            .register()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BuildpackError::RegistrationCommand {
                exit_code: Some(2),
                ..
            }
        ));
        assert!(!err.is_fatal());
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_login_failure_runs_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let runner = Arc::new(RecordingRunner::new(0));
        let config = base_config(Some(server.uri()));

        let err = orchestrator(&config, runner.clone())
            .register()
            .await
            .unwrap_err();

        assert!(matches!(err, BuildpackError::Authentication(_)));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_on_prem_command() {
        let mut config = base_config(Some("https://anypoint.corp.example".to_string()));
        config.platform.on_prem = true;
        let orch = orchestrator(&config, Arc::new(RecordingRunner::new(0)));

        let command = orch.registration_command("HASH", "orders0").unwrap();

        assert_eq!(
            command.render(),
            "export JAVA_HOME=/jre && /app/.java-buildpack/mule/bin/amc_setup \
             -A http://anypoint.corp.example:8080/hybrid/api/v1 \
             -W wss://anypoint.corp.example:8443/mule \
             -F https://anypoint.corp.example/apiplatform \
             -C https://anypoint.corp.example/accounts \
             -H HASH orders0"
        );
    }

    #[tokio::test]
    async fn test_server_name_is_one_shell_word() {
        let server_name = "orders api; touch /tmp/owned #0".to_string();
        let server = MockServer::start().await;
        mount_platform_listing(&server, &server_name).await;
        let runner = Arc::new(RecordingRunner::new(0));
        let mut config = base_config(Some(server.uri()));
        config.instance.application_name = Some("orders api; touch /tmp/owned #".to_string());

        let outcome = orchestrator(&config, runner.clone()).register().await.unwrap();

        assert_eq!(
            outcome,
            RegistrationOutcome::Registered {
                server_name: server_name.clone()
            }
        );
        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        let words = shlex::split(&commands[0]).unwrap();
        assert_eq!(words.last(), Some(&server_name));
        assert_eq!(words[words.len() - 2], "HASH");
    }

    #[test]
    fn test_default_java_home() {
        let mut config = base_config(None);
        config.instance.java_home = None;
        let orch = orchestrator(&config, Arc::new(RecordingRunner::new(0)));

        let command = orch.registration_command("HASH", "orders0").unwrap();
        assert!(command
            .render()
            .starts_with("export JAVA_HOME=/app/.java-buildpack/open_jdk_jre && "));
    }
}
