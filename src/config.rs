//! Runtime configuration for the workbench server.
//!
//! Everything is sourced from the environment (loaded via `dotenvy` in
//! `main`) with sensible defaults, then carried as a plain struct so handlers
//! never touch `std::env` directly.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Directory names suppressed from tree listings and watcher events.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    ".next",
    "dist",
    "build",
    "__pycache__",
    ".DS_Store",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Canonicalized root under which every per-owner workspace lives.
    pub workspace_root: PathBuf,
    /// Command used to start a user's dev server.
    pub dev_cmd: String,
    /// Repository cloned into fresh workspaces when no per-request URL is given.
    pub default_clone_url: Option<String>,
    pub max_read_bytes: u64,
    pub max_write_bytes: u64,
    pub excludes: Vec<String>,
    pub keepalive_interval: Duration,
    /// Whether the filesystem watcher is enabled at all.
    pub watch_enabled: bool,
    /// Ports probed for dev-server allocation, inclusive start, exclusive end.
    pub dev_port_range: (u16, u16),
}

impl Config {
    /// Build the configuration from the environment, creating and
    /// canonicalizing the workspace root.
    pub fn from_env() -> Result<Self> {
        let root = std::env::var("WORKSPACE_ROOT").unwrap_or_else(|_| "/tmp/workspaces".into());
        Self::with_root(PathBuf::from(root))
    }

    /// Same as [`Config::from_env`] but with an explicit workspace root
    /// (CLI override, tests).
    pub fn with_root(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create workspace root {}", root.display()))?;
        let workspace_root = root
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {}", root.display()))?;

        Ok(Self {
            workspace_root,
            dev_cmd: std::env::var("DEV_CMD")
                .unwrap_or_else(|_| "npm install && npm run dev".into()),
            default_clone_url: std::env::var("DEFAULT_CLONE_URL").ok().filter(|s| !s.is_empty()),
            max_read_bytes: env_u64("MAX_READ_BYTES", 1024 * 1024),
            max_write_bytes: env_u64("MAX_WRITE_BYTES", 2 * 1024 * 1024),
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            keepalive_interval: Duration::from_secs(20),
            watch_enabled: std::env::var("WATCH_ENABLED")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
            dev_port_range: (5100, 6000),
        })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excludes.iter().any(|e| e == name)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn with_root_creates_and_canonicalizes() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("ws");
        let config = Config::with_root(nested.clone()).unwrap();
        assert!(nested.exists());
        assert_eq!(config.workspace_root, nested.canonicalize().unwrap());
    }

    #[test]
    fn defaults_are_sensible() {
        let dir = tempdir().unwrap();
        let config = Config::with_root(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.max_read_bytes, 1024 * 1024);
        assert_eq!(config.max_write_bytes, 2 * 1024 * 1024);
        assert!(config.is_excluded("node_modules"));
        assert!(config.is_excluded(".git"));
        assert!(!config.is_excluded("src"));
        assert!(config.dev_port_range.0 < config.dev_port_range.1);
    }
}
