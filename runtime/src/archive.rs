//! Runtime archive installation.
//!
//! Expands a runtime distribution (tar.gz) into the sandbox, dropping the
//! single top-level directory every distribution is wrapped in.

use mule_buildpack_core::error::{BuildpackError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

/// Extract `archive_path` into `sandbox`, stripping one leading path component
/// from every entry.
///
/// Returns the number of entries written. Re-installing over an existing
/// sandbox replaces files, symlinks and hard links in place.
///
/// # Errors
///
/// Returns [`BuildpackError::Extraction`] if:
/// - The archive doesn't exist or can't be decompressed
/// - An entry escapes the sandbox (`..` components, a symlink target
///   outside the sandbox, or a path through such a symlink)
/// - An entry can't be written
/// - Nothing remains once the wrapper directory is stripped
pub fn install_archive(archive_path: &Path, sandbox: &Path) -> Result<usize> {
    let fail = |message: String| BuildpackError::Extraction {
        path: archive_path.display().to_string(),
        message,
    };

    if !archive_path.exists() {
        return Err(fail("archive not found".to_string()));
    }

    std::fs::create_dir_all(sandbox).map_err(|e| {
        fail(format!(
            "failed to create sandbox {}: {}",
            sandbox.display(),
            e
        ))
    })?;
    let root = sandbox.canonicalize().map_err(|e| {
        fail(format!(
            "failed to resolve sandbox {}: {}",
            sandbox.display(),
            e
        ))
    })?;

    let file = File::open(archive_path).map_err(|e| fail(format!("failed to open: {}", e)))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(|e| fail(format!("failed to read entries: {}", e)))?;

    let mut extracted = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| fail(format!("corrupt entry: {}", e)))?;
        let entry_path = entry
            .path()
            .map_err(|e| fail(format!("invalid entry path: {}", e)))?
            .into_owned();

        let Some(relative) = strip_leading_component(&entry_path).map_err(&fail)? else {
            continue;
        };
        let dest = root.join(&relative);

        if let Some(parent) = dest.parent() {
            ensure_contained(&root, parent).map_err(&fail)?;
            std::fs::create_dir_all(parent).map_err(|e| {
                fail(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        match entry.header().entry_type() {
            EntryType::Link => {
                // Hard link targets are archive paths and carry the wrapper too.
                let link_name = entry
                    .link_name()
                    .map_err(|e| fail(format!("invalid link target: {}", e)))?
                    .ok_or_else(|| {
                        fail(format!("hard link {} has no target", entry_path.display()))
                    })?
                    .into_owned();
                let target = strip_leading_component(&link_name)
                    .map_err(&fail)?
                    .ok_or_else(|| {
                        fail(format!(
                            "hard link {} points at the wrapper directory",
                            entry_path.display()
                        ))
                    })?;
                let source = root.join(target);
                ensure_contained(&root, &source).map_err(&fail)?;

                if dest.symlink_metadata().is_ok() {
                    std::fs::remove_file(&dest).map_err(|e| {
                        fail(format!("failed to replace {}: {}", dest.display(), e))
                    })?;
                }
                std::fs::hard_link(&source, &dest).map_err(|e| {
                    fail(format!("failed to link {}: {}", dest.display(), e))
                })?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(|e| fail(format!("invalid symlink target: {}", e)))?
                    .ok_or_else(|| {
                        fail(format!("symlink {} has no target", entry_path.display()))
                    })?
                    .into_owned();
                check_symlink_target(&relative, &target).map_err(&fail)?;
                entry
                    .unpack(&dest)
                    .map_err(|e| fail(format!("failed to unpack {}: {}", dest.display(), e)))?;
            }
            _ => {
                entry
                    .unpack(&dest)
                    .map_err(|e| fail(format!("failed to unpack {}: {}", dest.display(), e)))?;
            }
        }

        extracted += 1;
    }

    if extracted == 0 {
        return Err(fail(
            "archive has no entries beneath its top-level directory".to_string(),
        ));
    }

    tracing::debug!(
        archive = %archive_path.display(),
        sandbox = %sandbox.display(),
        entries = extracted,
        "Extracted runtime archive"
    );

    Ok(extracted)
}

/// Fail unless the deepest existing ancestor of `path` resolves inside `root`.
///
/// `root` must already be canonical.
fn ensure_contained(root: &Path, path: &Path) -> std::result::Result<(), String> {
    let Some(existing) = path.ancestors().find(|p| p.exists()) else {
        return Err(format!("{} is outside the sandbox", path.display()));
    };
    let resolved = existing
        .canonicalize()
        .map_err(|e| format!("failed to resolve {}: {}", existing.display(), e))?;
    if !resolved.starts_with(root) {
        return Err(format!(
            "{} resolves outside the sandbox ({})",
            path.display(),
            resolved.display()
        ));
    }
    Ok(())
}

/// Reject symlink targets that leave the sandbox when resolved from the
/// link's own directory (`link` is relative to the sandbox).
fn check_symlink_target(link: &Path, target: &Path) -> std::result::Result<(), String> {
    let mut depth = link.parent().map(|p| p.components().count()).unwrap_or(0);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!(
                    "symlink {} -> {} escapes the sandbox",
                    link.display(),
                    target.display()
                ));
            }
        }
    }
    Ok(())
}

/// Drop the first normal component of `path`.
///
/// Returns `None` for the wrapper directory itself.
fn strip_leading_component(path: &Path) -> std::result::Result<Option<PathBuf>, String> {
    let mut normal = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(format!("unsafe entry path: {}", path.display()));
            }
        }
    }

    if normal.len() < 2 {
        return Ok(None);
    }
    Ok(Some(normal[1..].iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_install_strips_wrapper_directory() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");

        create_test_archive(
            &archive,
            &["mule-standalone-3.7.0/", "mule-standalone-3.7.0/conf/"],
            &[
                ("mule-standalone-3.7.0/bin/mule", b"#!/bin/sh\n"),
                ("mule-standalone-3.7.0/conf/wrapper.conf", b"wrapper.java.maxmemory=1024\n"),
            ],
        );

        let extracted = install_archive(&archive, &sandbox).unwrap();

        assert_eq!(extracted, 3);
        assert!(sandbox.join("bin/mule").is_file());
        assert_eq!(
            fs::read_to_string(sandbox.join("conf/wrapper.conf")).unwrap(),
            "wrapper.java.maxmemory=1024\n"
        );
        assert!(!sandbox.join("mule-standalone-3.7.0").exists());
    }

    #[test]
    fn test_install_never_leaves_wrapper_segment() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");

        create_test_archive(
            &archive,
            &["./runtime-4.1.0/", "./runtime-4.1.0/lib/"],
            &[
                ("./runtime-4.1.0/lib/boot/mule-module-boot.jar", b"jar"),
                ("./runtime-4.1.0/README.txt", b"readme"),
            ],
        );

        install_archive(&archive, &sandbox).unwrap();

        for entry in walkdir::WalkDir::new(&sandbox) {
            let entry = entry.unwrap();
            assert!(!entry
                .path()
                .components()
                .any(|c| c.as_os_str() == "runtime-4.1.0"));
        }
        assert!(sandbox.join("lib/boot/mule-module-boot.jar").is_file());
        assert!(sandbox.join("README.txt").is_file());
    }

    #[test]
    fn test_install_creates_nested_sandbox() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("app/.java-buildpack/mule");

        create_test_archive(&archive, &[], &[("wrap/bin/mule", b"x")]);

        install_archive(&archive, &sandbox).unwrap();
        assert!(sandbox.join("bin/mule").exists());
    }

    #[test]
    fn test_install_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let result = install_archive(
            &temp_dir.path().join("nonexistent.tar.gz"),
            &temp_dir.path().join("sandbox"),
        );

        let err = result.unwrap_err();
        assert!(matches!(err, BuildpackError::Extraction { .. }));
        assert!(err.to_string().contains("archive not found"));
    }

    #[test]
    fn test_install_corrupt_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.tar.gz");
        fs::write(&archive, b"this is not gzip data").unwrap();

        let result = install_archive(&archive, &temp_dir.path().join("sandbox"));
        assert!(matches!(result, Err(BuildpackError::Extraction { .. })));
    }

    #[test]
    fn test_install_wrapper_only_archive_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("empty.tar.gz");
        create_test_archive(&archive, &["mule-standalone-3.7.0/"], &[("top-level.txt", b"x")]);

        let err = install_archive(&archive, &temp_dir.path().join("sandbox")).unwrap_err();
        assert!(err.to_string().contains("no entries beneath"));
    }

    #[test]
    fn test_strip_leading_component() {
        assert_eq!(
            strip_leading_component(Path::new("wrap/bin/mule")).unwrap(),
            Some(PathBuf::from("bin/mule"))
        );
        assert_eq!(
            strip_leading_component(Path::new("./wrap/conf")).unwrap(),
            Some(PathBuf::from("conf"))
        );
        assert_eq!(strip_leading_component(Path::new("wrap/")).unwrap(), None);
        assert!(strip_leading_component(Path::new("wrap/../../etc/passwd")).is_err());
    }

    #[test]
    fn test_symlink_outside_sandbox_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        create_mixed_archive(
            &archive,
            &[
                ("wrap/evil", EntryType::Symlink, outside.to_str().unwrap()),
                ("wrap/evil/pwned", EntryType::Regular, "owned"),
            ],
        );

        let err = install_archive(&archive, &sandbox).unwrap_err();
        assert!(matches!(err, BuildpackError::Extraction { .. }));
        assert!(err.to_string().contains("escapes the sandbox"));
        assert!(!outside.join("pwned").exists());
    }

    #[test]
    fn test_relative_symlink_climbing_out_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");

        create_mixed_archive(
            &archive,
            &[("wrap/lib/up", EntryType::Symlink, "../../outside")],
        );

        let result = install_archive(&archive, &sandbox);
        assert!(matches!(result, Err(BuildpackError::Extraction { .. })));
        assert!(sandbox.join("lib/up").symlink_metadata().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_existing_outside_symlink_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::create_dir_all(&sandbox).unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.join("conf")).unwrap();

        create_test_archive(&archive, &[], &[("wrap/conf/wrapper.conf", b"x")]);

        let result = install_archive(&archive, &sandbox);
        assert!(matches!(result, Err(BuildpackError::Extraction { .. })));
        assert!(!outside.join("wrapper.conf").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_sandbox_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");

        create_mixed_archive(
            &archive,
            &[
                ("wrap/lib/mule-core.jar", EntryType::Regular, "jar"),
                ("wrap/bin/core.jar", EntryType::Symlink, "../lib/mule-core.jar"),
            ],
        );

        assert_eq!(install_archive(&archive, &sandbox).unwrap(), 2);
        assert_eq!(fs::read_to_string(sandbox.join("bin/core.jar")).unwrap(), "jar");
    }

    #[cfg(unix)]
    #[test]
    fn test_reinstall_over_existing_sandbox() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("mule.tar.gz");
        let sandbox = temp_dir.path().join("sandbox");

        create_mixed_archive(
            &archive,
            &[
                ("wrap/lib/a.jar", EntryType::Regular, "jar"),
                ("wrap/lib/b.jar", EntryType::Link, "wrap/lib/a.jar"),
                ("wrap/lib/c.jar", EntryType::Symlink, "a.jar"),
            ],
        );

        assert_eq!(install_archive(&archive, &sandbox).unwrap(), 3);
        assert_eq!(install_archive(&archive, &sandbox).unwrap(), 3);
        assert_eq!(fs::read_to_string(sandbox.join("lib/b.jar")).unwrap(), "jar");
        assert_eq!(fs::read_to_string(sandbox.join("lib/c.jar")).unwrap(), "jar");
    }

    #[test]
    fn test_check_symlink_target() {
        assert!(check_symlink_target(Path::new("bin/x"), Path::new("../lib/y")).is_ok());
        assert!(check_symlink_target(Path::new("bin/x"), Path::new("./y")).is_ok());
        assert!(check_symlink_target(Path::new("bin/x"), Path::new("../../y")).is_err());
        assert!(check_symlink_target(Path::new("x"), Path::new("/etc/passwd")).is_err());
    }

    // Entries are (path, type, content for regular files or link target)
    fn create_mixed_archive(path: &Path, entries: &[(&str, EntryType, &str)]) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use tar::Builder;

        let file = File::create(path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

        for (name, kind, value) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            if *kind == EntryType::Regular {
                header.set_size(value.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, name, value.as_bytes()).unwrap();
            } else {
                header.set_size(0);
                builder.append_link(&mut header, name, value).unwrap();
            }
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    // Helper to build a tar.gz with explicit directory and file entries
    fn create_test_archive(path: &Path, dirs: &[&str], files: &[(&str, &[u8])]) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use tar::Builder;

        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);

        for dir in dirs {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, dir, std::io::empty()).unwrap();
        }

        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }
}
