//! Application deployment into the sandbox.
//!
//! Deployment is a merge, not a mirror: anything already present at the
//! destination is left untouched, so re-running a build never clobbers files
//! a previous run (or the operator) put there.

use mule_buildpack_core::error::{BuildpackError, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Counters for one deployment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployStats {
    pub files_copied: usize,
    pub dirs_created: usize,
    pub skipped_existing: usize,
}

/// Merge `source` into `target`, skipping any entry whose path contains a
/// component equal to `exclude`.
///
/// Directories are visited before their children. Existing destination paths
/// are never overwritten or removed.
pub fn deploy_application(source: &Path, target: &Path, exclude: &str) -> Result<DeployStats> {
    create_dir(target)?;

    let mut stats = DeployStats::default();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != exclude);

    for entry in walker {
        let entry = entry.map_err(|e| BuildpackError::Deployment {
            path: e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| source.display().to_string()),
            message: e.to_string(),
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| BuildpackError::Deployment {
                path: entry.path().display().to_string(),
                message: e.to_string(),
            })?;
        let destination = target.join(relative);

        if destination.symlink_metadata().is_ok() {
            stats.skipped_existing += 1;
            continue;
        }

        // Symlinks are resolved: a link to a directory deploys as a directory.
        let is_dir = if entry.path_is_symlink() {
            std::fs::metadata(entry.path())
                .map(|m| m.is_dir())
                .map_err(|e| deployment_error(entry.path(), e))?
        } else {
            entry.file_type().is_dir()
        };

        if is_dir {
            create_dir(&destination)?;
            stats.dirs_created += 1;
        } else {
            std::fs::copy(entry.path(), &destination)
                .map_err(|e| deployment_error(&destination, e))?;
            stats.files_copied += 1;
        }
    }

    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        files = stats.files_copied,
        dirs = stats.dirs_created,
        skipped = stats.skipped_existing,
        "Deployed application"
    );

    Ok(stats)
}

/// Copy every file under `resources` into `sandbox`, overwriting what is
/// there. A missing resource directory is a no-op.
pub fn overlay_resources(resources: &Path, sandbox: &Path) -> Result<usize> {
    if !resources.is_dir() {
        tracing::debug!(resources = %resources.display(), "No buildpack resources to overlay");
        return Ok(0);
    }

    let mut copied = 0usize;
    for entry in WalkDir::new(resources).min_depth(1) {
        let entry = entry.map_err(|e| BuildpackError::Deployment {
            path: resources.display().to_string(),
            message: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(resources)
            .map_err(|e| deployment_error(entry.path(), e))?;
        let destination = sandbox.join(relative);

        if entry.file_type().is_dir() {
            create_dir(&destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)
                .map_err(|e| deployment_error(&destination, e))?;
            copied += 1;
        }
    }

    tracing::debug!(
        resources = %resources.display(),
        sandbox = %sandbox.display(),
        files = copied,
        "Overlaid buildpack resources"
    );

    Ok(copied)
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| deployment_error(path, e))
}

fn deployment_error(path: &Path, err: impl std::fmt::Display) -> BuildpackError {
    BuildpackError::Deployment {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
