//! Management platform API client.
//!
//! A session against the platform's accounts and hybrid APIs: log in once,
//! resolve the organization and environment, then manage server
//! registrations within that scope.

use mule_buildpack_core::error::{BuildpackError, Result};
use mule_buildpack_core::PlatformConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Login endpoint (credentials passed as query parameters).
const LOGIN_PATH: &str = "/accounts/login";

/// Current user endpoint.
const ME_PATH: &str = "/accounts/api/me";

/// Server collection endpoint.
const SERVERS_PATH: &str = "/hybrid/api/v1/servers";

/// Registration token endpoint.
const REGISTRATION_TOKEN_PATH: &str = "/hybrid/api/v1/servers/registrationToken";

/// Organization scope header.
const ORG_HEADER: &str = "X-ANYPNT-ORG-ID";

/// Environment scope header.
const ENV_HEADER: &str = "X-ANYPNT-ENV-ID";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    organization: Organization,
}

#[derive(Debug, Deserialize)]
struct Organization {
    id: ResourceId,
}

#[derive(Debug, Deserialize)]
struct DataList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: Option<String>,
}

/// A named platform resource (environment or server).
#[derive(Debug, Clone, Deserialize)]
pub struct NamedResource {
    pub id: ResourceId,
    pub name: String,
}

/// Identifier that the platform sends as either a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Result of a best-effort server removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// No server with that name was registered
    NotFound,
    /// The server was deleted
    Removed { id: String },
    /// The delete call answered with something other than 204
    Failed { id: String, status: u16 },
}

/// Stateful platform session.
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: Option<String>,
    username: String,
    password: String,
    environment: String,
    access_token: Option<String>,
    org_id: Option<String>,
    env_id: Option<String>,
}

impl PlatformClient {
    /// Create an unauthenticated client.
    ///
    /// TLS certificates are verified unless
    /// `config.insecure_skip_tls_verify` is set.
    pub fn new(config: &PlatformConfig, timeout: Duration) -> Result<Self> {
        if config.insecure_skip_tls_verify {
            tracing::warn!(
                host = config.host.as_deref().unwrap_or(""),
                "TLS certificate verification DISABLED for platform calls"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| BuildpackError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
            environment: config.environment.clone().unwrap_or_default(),
            access_token: None,
            org_id: None,
            env_id: None,
        })
    }

    /// Whether `login` has succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Authenticate and store the access token.
    pub async fn login(&mut self) -> Result<()> {
        let url = self.url(LOGIN_PATH)?;
        tracing::info!(url = %url, "Getting access token for the platform");

        let response = self
            .http
            .post(&url)
            .query(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BuildpackError::Authentication(format!("login request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            BuildpackError::Authentication(format!("failed to read login response: {}", e))
        })?;

        if !status.is_success() {
            return Err(BuildpackError::Authentication(format!(
                "login returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let login: LoginResponse = serde_json::from_str(&body).map_err(|_| {
            BuildpackError::Authentication(format!("unexpected login response: {}", body.trim()))
        })?;

        let token = login
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                BuildpackError::Authentication("login response has no access_token".to_string())
            })?;

        self.access_token = Some(token);
        tracing::debug!("Obtained platform access token");
        Ok(())
    }

    /// Organization id of the logged-in user.
    pub async fn get_org_id(&mut self) -> Result<String> {
        let request = self.http.get(self.url(ME_PATH)?).bearer_auth(self.token()?);
        let me: MeResponse = self.send_json(request, ME_PATH).await?;

        let org_id = me.user.organization.id.to_string();
        self.org_id = Some(org_id.clone());
        Ok(org_id)
    }

    /// Id of the configured environment within `org_id`.
    pub async fn get_env_id(&mut self, org_id: &str) -> Result<String> {
        let path = format!("/accounts/api/organizations/{}/environments", org_id);
        let request = self
            .http
            .get(self.url(&path)?)
            .bearer_auth(self.token()?)
            .header(ORG_HEADER, org_id);
        let environments: DataList<NamedResource> = self.send_json(request, &path).await?;

        let env_id = environments
            .data
            .into_iter()
            .find(|env| env.name == self.environment)
            .map(|env| env.id.to_string())
            .ok_or_else(|| BuildpackError::EnvironmentNotFound {
                environment: self.environment.clone(),
            })?;

        self.env_id = Some(env_id.clone());
        Ok(env_id)
    }

    /// Delete the server registered as `name`, if any.
    ///
    /// Only transport and lookup failures are errors; a refused delete is
    /// reported as [`RemovalOutcome::Failed`].
    pub async fn remove_server(&mut self, name: &str) -> Result<RemovalOutcome> {
        tracing::info!(server_name = %name, "Attempting to remove server");
        let (org_id, env_id) = self.scope().await?;

        let request = self.scoped(self.http.get(self.url(SERVERS_PATH)?), &org_id, &env_id)?;
        let servers: DataList<NamedResource> = self.send_json(request, SERVERS_PATH).await?;

        let Some(server) = servers.data.into_iter().find(|srv| srv.name == name) else {
            tracing::info!(server_name = %name, "No existing server registration");
            return Ok(RemovalOutcome::NotFound);
        };

        let id = server.id.to_string();
        tracing::info!(server_name = %name, server_id = %id, "Found server, clearing it");

        let path = format!("{}/{}", SERVERS_PATH, id);
        let request = self.scoped(self.http.delete(self.url(&path)?), &org_id, &env_id)?;
        let response = request.send().await.map_err(|e| BuildpackError::Platform {
            status: 0,
            message: format!("DELETE {} failed: {}", path, e),
        })?;

        let status = response.status().as_u16();
        if status == 204 {
            tracing::info!(server_name = %name, server_id = %id, "Deleted server");
            Ok(RemovalOutcome::Removed { id })
        } else {
            tracing::warn!(
                server_name = %name,
                server_id = %id,
                org_id = %org_id,
                env_id = %env_id,
                status,
                "Server delete was not accepted"
            );
            Ok(RemovalOutcome::Failed { id, status })
        }
    }

    /// Fresh registration token for this organization and environment.
    ///
    /// Returns `None` when no platform host is configured.
    pub async fn get_registration_hash(&mut self) -> Result<Option<String>> {
        if self.base_url.is_none() {
            return Ok(None);
        }

        let (org_id, env_id) = self.scope().await?;
        tracing::info!(org_id = %org_id, env_id = %env_id, "Requesting registration token");

        let request = self.scoped(
            self.http.get(self.url(REGISTRATION_TOKEN_PATH)?),
            &org_id,
            &env_id,
        )?;
        let token: TokenResponse = self.send_json(request, REGISTRATION_TOKEN_PATH).await?;

        token
            .data
            .filter(|t| !t.is_empty())
            .map(Some)
            .ok_or_else(|| BuildpackError::Platform {
                status: 200,
                message: format!("{} returned no token", REGISTRATION_TOKEN_PATH),
            })
    }

    /// Resolved organization id, if looked up.
    pub fn org_id(&self) -> Option<&str> {
        self.org_id.as_deref()
    }

    /// Resolved environment id, if looked up.
    pub fn env_id(&self) -> Option<&str> {
        self.env_id.as_deref()
    }

    /// Organization and environment ids, resolving them on first use.
    async fn scope(&mut self) -> Result<(String, String)> {
        let org_id = match self.org_id.clone() {
            Some(id) => id,
            None => self.get_org_id().await?,
        };
        let env_id = match self.env_id.clone() {
            Some(id) => id,
            None => self.get_env_id(&org_id).await?,
        };
        Ok((org_id, env_id))
    }

    fn url(&self, path: &str) -> Result<String> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            BuildpackError::Config("platform host not configured".to_string())
        })?;
        Ok(format!("{}{}", base, path))
    }

    fn token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| BuildpackError::Authentication("not logged in".to_string()))
    }

    fn scoped(
        &self,
        request: reqwest::RequestBuilder,
        org_id: &str,
        env_id: &str,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(request
            .bearer_auth(self.token()?)
            .header(ORG_HEADER, org_id)
            .header(ENV_HEADER, env_id))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T> {
        let request = request.build().map_err(|e| BuildpackError::Platform {
            status: 0,
            message: format!("invalid request for {}: {}", path, e),
        })?;
        let method = request.method().clone();

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| BuildpackError::Platform {
                status: 0,
                message: format!("{} {} failed: {}", method, path, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BuildpackError::Platform {
                status: status.as_u16(),
                message: format!("{} {}", method, path),
            });
        }

        response.json::<T>().await.map_err(|e| {
            BuildpackError::Serialization(format!("invalid response from {}: {}", path, e))
        })
    }
}
