//! Service configuration.
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! file (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WharfError};
use crate::log::LogConfig;

/// Default Unix socket the service listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/run/wharf/io.wharf";

/// Default image store location (`~` is expanded at load time).
pub const DEFAULT_STORE_DIR: &str = "~/.local/share/wharf/images";

/// Default drain-loop poll interval for streaming calls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default per-registry search limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 1000;

/// Wharf service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WharfConfig {
    /// Unix socket for RPC clients
    pub socket_path: PathBuf,

    /// Root of the local image store
    pub store_dir: PathBuf,

    /// Registries queried by search, in order
    pub registries: Vec<String>,

    /// Signature policy file forwarded to pulls and pushes
    pub signature_policy_path: Option<PathBuf>,

    /// Sleep between buffer polls for streaming calls
    pub poll_interval_ms: u64,

    /// Results requested per registry when the caller gives no limit
    pub search_limit: usize,

    /// Logging
    pub log: LogConfig,
}

impl Default for WharfConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            registries: vec!["docker.io".to_string()],
            signature_policy_path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            search_limit: DEFAULT_SEARCH_LIMIT,
            log: LogConfig::default(),
        }
    }
}

impl WharfConfig {
    /// Load configuration from a YAML file and expand `~` in paths.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            WharfError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: WharfConfig = serde_yaml::from_str(&data)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Expand a leading `~` in the store and socket paths.
    pub fn expand_paths(&mut self) {
        self.store_dir = expand_home(&self.store_dir);
        self.socket_path = expand_home(&self.socket_path);
        if let Some(policy) = self.signature_policy_path.take() {
            self.signature_policy_path = Some(expand_home(&policy));
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(WharfError::ConfigError(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.search_limit == 0 {
            return Err(WharfError::ConfigError(
                "search_limit must be greater than zero".to_string(),
            ));
        }
        if self.registries.iter().any(|r| r.trim().is_empty()) {
            return Err(WharfError::ConfigError(
                "registries must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `~` or `~/…` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" || s.starts_with("~/") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        return home.join(s.trim_start_matches('~').trim_start_matches('/'));
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogFormat;

    #[test]
    fn test_defaults() {
        let config = WharfConfig::default();
        assert_eq!(config.registries, vec!["docker.io"]);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.search_limit, 1000);
        assert!(config.signature_policy_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wharf.yaml");
        std::fs::write(
            &path,
            "registries: [quay.io, docker.io]\npoll_interval_ms: 250\nlog:\n  level: debug\n  format: json\n",
        )
        .unwrap();

        let config = WharfConfig::from_file(&path).unwrap();
        assert_eq!(config.registries, vec!["quay.io", "docker.io"]);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.search_limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_from_file_missing() {
        let err = WharfConfig::from_file(Path::new("/nonexistent/wharf.yaml")).unwrap_err();
        assert!(matches!(err, WharfError::ConfigError(_)));
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wharf.yaml");
        std::fs::write(&path, "registries: {").unwrap();
        let err = WharfConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, WharfError::SerializationError(_)));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let config = WharfConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_registry() {
        let config = WharfConfig {
            registries: vec!["docker.io".to_string(), " ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("~/images"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("images"));

        let absolute = expand_home(Path::new("/var/lib/wharf"));
        assert_eq!(absolute, PathBuf::from("/var/lib/wharf"));
    }
}
