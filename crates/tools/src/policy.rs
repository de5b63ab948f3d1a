//! Path policy: filesystem sandboxing for the file tools.
//!
//! Relative paths are resolved against the workspace root. The result must
//! lie inside an allowed root (the workspace root when none are configured)
//! and outside every forbidden prefix.

use std::path::{Component, Path, PathBuf};

use ferrocall_config::ToolsConfig;

/// Error returned when a path is refused.
#[derive(Debug, thiserror::Error)]
pub enum PathViolation {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Empty path")]
    Empty,
}

/// Where the file tools may read and write.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    workspace_root: PathBuf,
    allowed_roots: Vec<PathBuf>,
    forbidden_paths: Vec<(String, PathBuf)>,
}

impl PathPolicy {
    /// A policy confined to `workspace_root`, nothing forbidden.
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: resolve_existing_prefix(workspace_root.as_ref()),
            allowed_roots: Vec::new(),
            forbidden_paths: Vec::new(),
        }
    }

    /// Build from the `[tools]` config section.
    ///
    /// Without a configured workspace root the current directory is used.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let root = config
            .workspace_root
            .as_deref()
            .map(|r| PathBuf::from(expand_tilde(r)))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut policy = Self::new(root);
        for allowed in &config.allowed_roots {
            policy = policy.allow_root(allowed);
        }
        for forbidden in &config.forbidden_paths {
            policy = policy.forbid(forbidden);
        }
        policy
    }

    /// Add an allowed root. Once any is added, the workspace root is no
    /// longer implicitly allowed.
    pub fn allow_root(mut self, root: &str) -> Self {
        let expanded = PathBuf::from(expand_tilde(root));
        self.allowed_roots
            .push(resolve_existing_prefix(&self.absolutize(&expanded)));
        self
    }

    /// Forbid a path prefix (`~` is expanded).
    pub fn forbid(mut self, pattern: &str) -> Self {
        let expanded = PathBuf::from(expand_tilde(pattern));
        let resolved = resolve_existing_prefix(&self.absolutize(&expanded));
        self.forbidden_paths.push((pattern.to_string(), resolved));
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Validate `raw` and return the absolute path the tool should touch.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, PathViolation> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PathViolation::Empty);
        }

        let expanded = PathBuf::from(expand_tilde(raw));
        if expanded.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PathViolation::PathTraversal { path: raw.into() });
        }

        // Symlinks are followed for the part of the path that exists
        let resolved = resolve_existing_prefix(&self.absolutize(&expanded));

        if let Some((pattern, _)) = self
            .forbidden_paths
            .iter()
            .find(|(_, prefix)| resolved.starts_with(prefix))
        {
            return Err(PathViolation::ForbiddenPath {
                path: raw.into(),
                pattern: pattern.clone(),
            });
        }

        let inside = if self.allowed_roots.is_empty() {
            resolved.starts_with(&self.workspace_root)
        } else {
            self.allowed_roots.iter().any(|root| resolved.starts_with(root))
        };
        if !inside {
            return Err(PathViolation::OutsideAllowedRoots { path: raw.into() });
        }

        Ok(resolved)
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// rest, so paths that do not exist yet (write targets) still compare
/// against canonical roots.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    // Nothing exists; drop `.` components and keep the path as given
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(dir.path());

        let resolved = policy.resolve("./README.md").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("README.md"));

        let root = policy.resolve(".").unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn path_traversal_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(dir.path());

        match policy.resolve("../../../etc/passwd") {
            Err(PathViolation::PathTraversal { .. }) => {}
            other => panic!("Expected PathTraversal, got: {other:?}"),
        }
        assert!(policy.resolve("src/../../secret").is_err());
    }

    #[test]
    fn outside_workspace_blocked() {
        let workspace = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(workspace.path());

        let outside = elsewhere.path().join("file.txt");
        match policy.resolve(outside.to_str().unwrap()) {
            Err(PathViolation::OutsideAllowedRoots { .. }) => {}
            other => panic!("Expected OutsideAllowedRoots, got: {other:?}"),
        }
    }

    #[test]
    fn allowed_roots_replace_workspace_confinement() {
        let workspace = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(workspace.path()).allow_root(shared.path().to_str().unwrap());

        let in_shared = shared.path().join("notes.md");
        assert!(policy.resolve(in_shared.to_str().unwrap()).is_ok());
        assert!(policy.resolve("local.txt").is_err());
    }

    #[test]
    fn forbidden_takes_precedence_over_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("secrets")).unwrap();
        let policy = PathPolicy::new(dir.path()).forbid(dir.path().join("secrets").to_str().unwrap());

        match policy.resolve("secrets/key.pem") {
            Err(PathViolation::ForbiddenPath { pattern, .. }) => assert!(pattern.ends_with("secrets")),
            other => panic!("Expected ForbiddenPath, got: {other:?}"),
        }
        assert!(policy.resolve("public/readme.md").is_ok());
    }

    #[test]
    fn forbidden_with_tilde_expansion() {
        if let Some(home) = home_dir() {
            let policy = PathPolicy::new(&home).forbid("~/.ssh");
            let result = policy.resolve(&format!("{home}/.ssh/id_rsa"));
            assert!(result.is_err());
        }
    }

    #[test]
    fn empty_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(dir.path());
        assert!(matches!(policy.resolve("  "), Err(PathViolation::Empty)));
    }

    #[test]
    fn from_config_uses_configured_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolsConfig {
            workspace_root: Some(dir.path().to_string_lossy().into_owned()),
            ..ToolsConfig::default()
        };
        let policy = PathPolicy::from_config(&config);
        assert_eq!(policy.workspace_root(), dir.path().canonicalize().unwrap());
    }
}
