// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Collector configuration.
//!
//! Configuration comes from explicit builder calls with environment-variable
//! fallbacks; there is no config file. The collector runs in "local-only"
//! mode when no API key is configured: no credential validation, no remote
//! flush, and no usage reporting.

use std::path::{Path, PathBuf};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "AIOBS_API_KEY";

/// Environment variable overriding the collection-service base URL.
pub const BASE_URL_ENV: &str = "AIOBS_BASE_URL";

/// Environment variable overriding the local export path.
pub const EXPORT_PATH_ENV: &str = "AIOBS_EXPORT_PATH";

/// Default collection-service base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.aiobs.dev";

/// Directory under the home dir for default export artifacts.
pub const EXPORT_DIR: &str = ".aiobs/exports";

/// Configuration for a [`Collector`](crate::collector::Collector).
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// API key for the remote collection service. `None` means local-only mode.
    pub api_key: Option<String>,
    /// Base URL of the collection service.
    pub base_url: String,
    /// Explicit local export path; overrides the env and per-session defaults.
    pub export_path: Option<PathBuf>,
    /// Whether `flush()` writes a local artifact when no exporter is supplied.
    pub persist: bool,
    /// Whether `flush()` reconstructs the trace tree.
    pub build_tree: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            export_path: None,
            persist: true,
            build_tree: true,
        }
    }
}

impl CollectorConfig {
    /// Build a configuration from the environment.
    ///
    /// Reads `AIOBS_API_KEY` and `AIOBS_BASE_URL`; the export path env var is
    /// resolved lazily at flush time so changes between flushes are honored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        config
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set an explicit export path.
    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    /// Enable or disable the local artifact write.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Enable or disable trace-tree reconstruction at flush time.
    pub fn with_build_tree(mut self, build_tree: bool) -> Self {
        self.build_tree = build_tree;
        self
    }

    /// Whether a credential is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Default export directory (`~/.aiobs/exports`, falling back to a relative
/// path when no home directory is known).
pub fn default_export_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(EXPORT_DIR))
        .unwrap_or_else(|| PathBuf::from(EXPORT_DIR))
}

/// Resolve the export target for a flush.
///
/// Precedence: explicit argument, then `AIOBS_EXPORT_PATH`, then a
/// per-session default file under the export directory.
pub fn resolve_export_path(explicit: Option<&Path>, session_id: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(EXPORT_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    default_export_dir().join(format!("{}.json", session_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.persist);
        assert!(config.build_tree);
        assert!(!config.has_credential());
    }

    #[test]
    fn test_builder_chain() {
        let config = CollectorConfig::default()
            .with_api_key("sk-test")
            .with_base_url("http://localhost:9090")
            .with_persist(false)
            .with_build_tree(false);

        assert!(config.has_credential());
        assert_eq!(config.base_url, "http://localhost:9090");
        assert!(!config.persist);
        assert!(!config.build_tree);
    }

    #[test]
    fn test_resolve_export_path_explicit_wins() {
        let explicit = PathBuf::from("/tmp/out.json");
        let resolved = resolve_export_path(Some(&explicit), "sess-1");
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn test_resolve_export_path_session_default() {
        // Explicit absence and (normally) unset env fall through to the
        // per-session default filename.
        if std::env::var(EXPORT_PATH_ENV).is_ok() {
            return;
        }
        let resolved = resolve_export_path(None, "sess-abc");
        assert!(resolved.ends_with("sess-abc.json") || resolved.to_string_lossy().contains("sess-abc"));
    }
}
