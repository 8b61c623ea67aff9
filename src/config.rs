//! Engine configuration.
//!
//! Loaded from an optional TOML file; every field has a default.
//!
//! ```toml
//! data_dir = "/var/lib/dbhub"
//! default_branch = "main"
//! max_history_depth = 100000
//! log_filter = "dbhub=debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{CommitStore, InvalidNameError, RefName};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid default branch name: {0}")]
    InvalidBranch(#[from] InvalidNameError),

    #[error("max_history_depth must be greater than zero")]
    ZeroHistoryDepth,
}

/// Configuration for a repository manager and the command-line front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory of the file-backed stores.
    pub data_dir: PathBuf,
    /// Branch name given to newly created repositories.
    pub default_branch: String,
    /// Most commits a single history walk may visit.
    pub max_history_depth: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".dbhub"),
            default_branch: "main".to_string(),
            max_history_depth: CommitStore::DEFAULT_WALK_LIMIT,
            log_filter: "dbhub=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration rooted at the given directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load and validate a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn data_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.data_dir = value.into();
        self
    }

    pub fn default_branch(mut self, value: impl Into<String>) -> Self {
        self.default_branch = value.into();
        self
    }

    pub fn max_history_depth(mut self, value: usize) -> Self {
        self.max_history_depth = value;
        self
    }

    pub fn log_filter(mut self, value: impl Into<String>) -> Self {
        self.log_filter = value.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history_depth == 0 {
            return Err(ConfigError::ZeroHistoryDepth);
        }
        self.default_branch_name()?;
        Ok(())
    }

    /// the default branch as a validated name
    pub fn default_branch_name(&self) -> Result<RefName, ConfigError> {
        Ok(RefName::new(self.default_branch.as_str())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.data_dir, PathBuf::from(".dbhub"));
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.max_history_depth, 100_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("/tmp/hub")
            .default_branch("trunk")
            .max_history_depth(50)
            .log_filter("dbhub=debug");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/hub"));
        assert_eq!(config.default_branch_name().unwrap().as_str(), "trunk");
        assert_eq!(config.max_history_depth, 50);
    }

    #[test]
    fn test_from_toml_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbhub.toml");
        fs::write(&path, "default_branch = \"master\"\nmax_history_depth = 10\n").unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.default_branch, "master");
        assert_eq!(config.max_history_depth, 10);
        assert_eq!(config.log_filter, "dbhub=info");
    }

    #[test]
    fn test_validation_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbhub.toml");

        fs::write(&path, "max_history_depth = 0\n").unwrap();
        assert!(matches!(
            EngineConfig::from_toml_file(&path),
            Err(ConfigError::ZeroHistoryDepth)
        ));

        fs::write(&path, "default_branch = \"bad|name\"\n").unwrap();
        assert!(matches!(
            EngineConfig::from_toml_file(&path),
            Err(ConfigError::InvalidBranch(_))
        ));

        fs::write(&path, "max_history_depth = \"lots\"\n").unwrap();
        assert!(matches!(
            EngineConfig::from_toml_file(&path),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            EngineConfig::from_toml_file(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
