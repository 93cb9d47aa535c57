//! Heap sizing for the runtime wrapper.
//!
//! Half of the container memory limit goes to the Java heap, applied to the
//! wrapper's initial and maximum heap settings.

use mule_buildpack_core::error::{BuildpackError, Result};
use mule_buildpack_core::MemoryPolicy;
use std::path::Path;

/// Wrapper key for the initial heap size (MB).
pub const INIT_MEMORY_KEY: &str = "wrapper.java.initmemory";

/// Wrapper key for the maximum heap size (MB).
pub const MAX_MEMORY_KEY: &str = "wrapper.java.maxmemory";

/// Heap budget in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget(u64);

impl MemoryBudget {
    /// Derive the budget from a container memory limit such as `512m`.
    ///
    /// The trailing unit letter is dropped and the value halved, truncating.
    pub fn from_limit(limit: &str) -> Result<Self> {
        let trimmed = limit.trim();
        let digits = match trimmed.chars().last() {
            Some(unit) if unit.is_ascii_alphabetic() => &trimmed[..trimmed.len() - 1],
            _ => trimmed,
        };

        let total: u64 = digits.parse().map_err(|_| {
            BuildpackError::MemoryConfig(format!("unparsable memory limit '{}'", limit))
        })?;

        let budget = total / 2;
        if budget == 0 {
            return Err(BuildpackError::MemoryConfig(format!(
                "memory limit '{}' too small for a heap",
                limit
            )));
        }

        Ok(Self(budget))
    }

    pub fn megabytes(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Apply the memory limit to `wrapper_conf` according to `policy`.
///
/// Never fails: an absent or unparsable limit, or an unwritable config, is
/// logged as a warning and `None` is returned.
pub fn configure_memory(
    wrapper_conf: &Path,
    memory_limit: Option<&str>,
    policy: MemoryPolicy,
) -> Option<MemoryBudget> {
    match try_configure_memory(wrapper_conf, memory_limit, policy) {
        Ok(budget) => {
            tracing::info!(
                conf = %wrapper_conf.display(),
                budget_mb = budget.megabytes(),
                policy = %policy,
                "Configured runtime heap"
            );
            Some(budget)
        }
        Err(e) => {
            tracing::warn!(conf = %wrapper_conf.display(), "{}", e);
            None
        }
    }
}

/// Fallible core of [`configure_memory`].
pub fn try_configure_memory(
    wrapper_conf: &Path,
    memory_limit: Option<&str>,
    policy: MemoryPolicy,
) -> Result<MemoryBudget> {
    let limit = memory_limit
        .ok_or_else(|| BuildpackError::MemoryConfig("MEMORY_LIMIT not set".to_string()))?;
    let budget = MemoryBudget::from_limit(limit)?;

    let content = std::fs::read_to_string(wrapper_conf).map_err(|e| {
        BuildpackError::MemoryConfig(format!(
            "cannot read {}: {}",
            wrapper_conf.display(),
            e
        ))
    })?;

    let patched = apply_policy(&content, budget, policy);
    std::fs::write(wrapper_conf, patched).map_err(|e| {
        BuildpackError::MemoryConfig(format!(
            "cannot write {}: {}",
            wrapper_conf.display(),
            e
        ))
    })?;

    Ok(budget)
}

/// Rewrite wrapper config text for `budget`.
pub fn apply_policy(content: &str, budget: MemoryBudget, policy: MemoryPolicy) -> String {
    let mut seen_init = false;
    let mut seen_max = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| match heap_key(line) {
            Some(key) => {
                if key == INIT_MEMORY_KEY {
                    seen_init = true;
                } else {
                    seen_max = true;
                }
                match policy {
                    MemoryPolicy::Substitute => format!("{}={}", key, budget),
                    MemoryPolicy::CommentOut => format!("#{}", line),
                }
            }
            None => line.to_string(),
        })
        .collect();

    if policy == MemoryPolicy::Substitute {
        if !seen_init {
            lines.push(format!("{}={}", INIT_MEMORY_KEY, budget));
        }
        if !seen_max {
            lines.push(format!("{}={}", MAX_MEMORY_KEY, budget));
        }
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') || (content.is_empty() && !lines.is_empty()) {
        out.push('\n');
    }
    out
}

/// The heap key an active (uncommented) line assigns, if any.
fn heap_key(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    [INIT_MEMORY_KEY, MAX_MEMORY_KEY].into_iter().find(|key| {
        trimmed
            .strip_prefix(key)
            .map(|rest| rest.trim_start().starts_with('='))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const WRAPPER_CONF: &str = "\
# Java Heap Size (in MB)
wrapper.java.initmemory=1024
wrapper.java.maxmemory = 1024
wrapper.java.additional.4=-XX:MaxPermSize=256m
";

    #[test]
    fn test_budget_halves_limit() {
        assert_eq!(MemoryBudget::from_limit("1024m").unwrap().megabytes(), 512);
        assert_eq!(MemoryBudget::from_limit("2048m").unwrap().megabytes(), 1024);
    }

    #[test]
    fn test_budget_truncates() {
        assert_eq!(MemoryBudget::from_limit("513m").unwrap().megabytes(), 256);
        assert_eq!(MemoryBudget::from_limit("3m").unwrap().megabytes(), 1);
    }

    #[test]
    fn test_budget_rejects_garbage() {
        assert!(matches!(
            MemoryBudget::from_limit("lots"),
            Err(BuildpackError::MemoryConfig(_))
        ));
        assert!(MemoryBudget::from_limit("").is_err());
        assert!(MemoryBudget::from_limit("1m").is_err());
        assert!(MemoryBudget::from_limit("-512m").is_err());
    }

    #[test]
    fn test_substitute_policy() {
        let budget = MemoryBudget::from_limit("1024m").unwrap();
        let out = apply_policy(WRAPPER_CONF, budget, MemoryPolicy::Substitute);

        assert!(out.contains("wrapper.java.initmemory=512\n"));
        assert!(out.contains("wrapper.java.maxmemory=512\n"));
        assert!(out.contains("wrapper.java.additional.4=-XX:MaxPermSize=256m\n"));
        assert!(!out.contains("1024"));
    }

    #[test]
    fn test_substitute_appends_missing_keys() {
        let budget = MemoryBudget::from_limit("512m").unwrap();
        let out = apply_policy("wrapper.debug=FALSE\n", budget, MemoryPolicy::Substitute);
        assert_eq!(
            out,
            "wrapper.debug=FALSE\nwrapper.java.initmemory=256\nwrapper.java.maxmemory=256\n"
        );
    }

    #[test]
    fn test_comment_out_policy() {
        let budget = MemoryBudget::from_limit("1024m").unwrap();
        let out = apply_policy(WRAPPER_CONF, budget, MemoryPolicy::CommentOut);

        assert!(out.contains("#wrapper.java.initmemory=1024\n"));
        assert!(out.contains("#wrapper.java.maxmemory = 1024\n"));
        assert!(out.contains("\nwrapper.java.additional.4"));
    }

    #[test]
    fn test_policies_are_idempotent() {
        let budget = MemoryBudget::from_limit("1024m").unwrap();
        for policy in [MemoryPolicy::Substitute, MemoryPolicy::CommentOut] {
            let once = apply_policy(WRAPPER_CONF, budget, policy);
            let twice = apply_policy(&once, budget, policy);
            assert_eq!(once, twice, "policy {} not idempotent", policy);
        }
    }

    #[test]
    fn test_similar_keys_untouched() {
        let budget = MemoryBudget::from_limit("1024m").unwrap();
        let content = "wrapper.java.initmemory.extra=7\n";
        let out = apply_policy(content, budget, MemoryPolicy::CommentOut);
        assert_eq!(out, content);
    }

    #[test]
    fn test_configure_memory_patches_file() {
        let temp = TempDir::new().unwrap();
        let conf = temp.path().join("wrapper.conf");
        fs::write(&conf, WRAPPER_CONF).unwrap();

        let budget = configure_memory(&conf, Some("2048m"), MemoryPolicy::Substitute);

        assert_eq!(budget.map(|b| b.megabytes()), Some(1024));
        let patched = fs::read_to_string(&conf).unwrap();
        assert!(patched.contains("wrapper.java.maxmemory=1024"));
    }

    #[test]
    fn test_configure_memory_absent_limit_warns() {
        let temp = TempDir::new().unwrap();
        let conf = temp.path().join("wrapper.conf");
        fs::write(&conf, WRAPPER_CONF).unwrap();

        assert!(configure_memory(&conf, None, MemoryPolicy::Substitute).is_none());
        assert_eq!(fs::read_to_string(&conf).unwrap(), WRAPPER_CONF);

        let err = try_configure_memory(&conf, None, MemoryPolicy::Substitute).unwrap_err();
        assert!(matches!(err, BuildpackError::MemoryConfig(_)));
    }

    #[test]
    fn test_configure_memory_missing_conf_warns() {
        let temp = TempDir::new().unwrap();
        let conf = temp.path().join("missing.conf");
        assert!(configure_memory(&conf, Some("1024m"), MemoryPolicy::CommentOut).is_none());
        assert!(!conf.exists());
    }
}
