//! Runtime configuration
//!
//! Every field has a default so an empty or missing YAML file yields a
//! working setup rooted at `./library`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::errors::{Result, StemflowError};

/// Which ledger backend persists project snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// One `metadata.json` per project directory
    #[default]
    Json,
    /// Embedded sled database under the library root
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding one sub-directory per project
    pub library_dir: PathBuf,
    pub ledger_backend: LedgerBackend,
    /// File extension the executor writes stems with
    pub output_format: String,
    /// Seconds without traffic before a subscriber emits a heartbeat
    pub heartbeat_secs: u64,
    /// Timed-dequeue interval of a subscriber
    pub poll_interval_ms: u64,
    /// Optional YAML catalog replacing the built-in one
    pub catalog_path: Option<PathBuf>,
    /// Program invoked by the process-backed executor
    pub separator_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from("library"),
            ledger_backend: LedgerBackend::Json,
            output_format: "flac".to_string(),
            heartbeat_secs: 15,
            poll_interval_ms: 1000,
            catalog_path: None,
            separator_command: "audio-separator".to_string(),
        }
    }
}

impl Config {
    /// Reads and validates a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StemflowError::io(format!("read config {}", path.display()), e))?;
        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            StemflowError::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 {
            return Err(StemflowError::configuration("heartbeat_secs must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(StemflowError::configuration("poll_interval_ms must be greater than 0"));
        }
        if self.poll_interval() >= self.heartbeat_interval() {
            return Err(StemflowError::configuration(
                "poll_interval_ms must be shorter than the heartbeat interval",
            ));
        }
        if self.output_format.trim().is_empty() {
            return Err(StemflowError::configuration("output_format cannot be empty"));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config =
            serde_yaml::from_str("library_dir: /tmp/stems\nledger_backend: sled\n").unwrap();
        assert_eq!(config.library_dir, PathBuf::from("/tmp/stems"));
        assert_eq!(config.ledger_backend, LedgerBackend::Sled);
        assert_eq!(config.output_format, "flac");
        assert_eq!(config.heartbeat_secs, 15);
    }

    #[test]
    fn test_poll_must_be_shorter_than_heartbeat() {
        let config = Config {
            heartbeat_secs: 1,
            poll_interval_ms: 1000,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StemflowError::Configuration { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stemflow.yaml");
        std::fs::write(&path, "output_format: wav\nheartbeat_secs: 5\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.output_format, "wav");
        assert_eq!(config.heartbeat_secs, 5);
    }
}
