//! Dependency downloads.
//!
//! Resolves runtime archives, user libraries and policies to local files.
//! Remote files are cached in the buildpack cache directory under a digest of
//! their full URL, keeping the original file name.

use futures::StreamExt;
use mule_buildpack_core::error::{BuildpackError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Fetches dependencies into a cache directory.
pub struct Downloader {
    http: reqwest::Client,
    cache_dir: PathBuf,
}

impl Downloader {
    /// Create a downloader with a per-request `timeout`.
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BuildpackError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            cache_dir: cache_dir.into(),
        })
    }

    /// Resolve `uri` to a local file.
    ///
    /// `http(s)` URIs are downloaded (or taken from cache); `file://` URIs and
    /// plain paths must already exist.
    pub async fn fetch(&self, uri: &str) -> Result<PathBuf> {
        if is_remote(uri) {
            return self.download(uri).await;
        }

        let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        if !path.is_file() {
            return Err(BuildpackError::Download {
                url: uri.to_string(),
                status_code: 0,
                message: format!("{} does not exist", path.display()),
            });
        }
        Ok(path)
    }

    /// Fetch `uri` and copy it into `dir` under its original file name.
    pub async fn fetch_into(&self, uri: &str, dir: &Path) -> Result<PathBuf> {
        let source = self.fetch(uri).await?;
        let name = file_name(uri)?;

        tokio::fs::create_dir_all(dir).await?;
        let dest = dir.join(name);
        tokio::fs::copy(&source, &dest).await.map_err(|e| {
            BuildpackError::Deployment {
                path: dest.display().to_string(),
                message: e.to_string(),
            }
        })?;

        tracing::info!(uri = %uri, dest = %dest.display(), "Installed dependency");
        Ok(dest)
    }

    /// Cache location for `url`: `<cache>/<sha256(url)>/<file name>`.
    pub fn cache_path(&self, url: &str) -> Result<PathBuf> {
        let name = file_name(url)?;
        Ok(self.cache_dir.join(cache_key(url)).join(name))
    }

    async fn download(&self, url: &str) -> Result<PathBuf> {
        let cache_path = self.cache_path(url)?;
        if cache_path.exists() {
            tracing::debug!(url = %url, path = %cache_path.display(), "Using cached download");
            return Ok(cache_path);
        }

        tracing::info!(url = %url, "Downloading");
        let response = self.http.get(url).send().await.map_err(|e| {
            BuildpackError::Download {
                url: url.to_string(),
                status_code: 0,
                message: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(BuildpackError::Download {
                url: url.to_string(),
                status_code: response.status().as_u16(),
                message: "Download failed".to_string(),
            });
        }

        if let Some(dir) = cache_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Write then rename so an interrupted download never poisons the cache.
        let partial = cache_path.with_extension("partial");
        let written = match stream_to_file(response, &partial).await {
            Ok(written) => written,
            Err(message) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(BuildpackError::Download {
                    url: url.to_string(),
                    status_code: 0,
                    message,
                });
            }
        };
        tokio::fs::rename(&partial, &cache_path).await?;

        tracing::debug!(
            url = %url,
            path = %cache_path.display(),
            bytes = written,
            "Downloaded"
        );
        Ok(cache_path)
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
) -> std::result::Result<u64, String> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;

    Ok(written)
}

/// Hex SHA-256 of `url` without its fragment.
fn cache_key(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let mut hasher = Sha256::new();
    hasher.update(without_fragment.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Last path segment of `uri`, without query or fragment.
fn file_name(uri: &str) -> Result<String> {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BuildpackError::Config(format!("cannot derive a file name from '{}'", uri)))
}
