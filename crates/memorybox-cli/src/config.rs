//! YAML-backed configuration file: named store targets (spec §3, §6).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use memorybox_core::TargetConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures loading or persisting the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but isn't valid YAML, or a `set`/`delete` named an
    /// unknown target.
    #[error("config error: {0}")]
    Malformed(String),
    /// Reading, creating, or writing the config file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The persisted document: every named store target this CLI knows about.
#[derive(Default, Serialize, Deserialize)]
pub struct Config {
    /// Target name -> store factory configuration (spec §3 "Configuration
    /// target", §6 "Store factory configuration").
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

impl Config {
    /// Resolve the on-disk path: `$MEMORYBOX_CONFIG` if set, otherwise
    /// `<platform config dir>/memorybox/config.yaml`.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("MEMORYBOX_CONFIG") {
            return PathBuf::from(path);
        }
        let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        base.join("memorybox").join("config.yaml")
    }

    /// Load the document at `path`, or an empty one if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the document to `path`, creating parent directories as needed.
    pub fn persist(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Look up a named target, failing loudly if it isn't configured.
    pub fn target(&self, name: &str) -> Result<&TargetConfig, ConfigError> {
        self.targets
            .get(name)
            .ok_or_else(|| ConfigError::Malformed(format!("unknown target `{name}`")))
    }

    /// Set `key = value` on `target`, creating the target if it's new.
    pub fn set(&mut self, target: &str, key: &str, value: &str) {
        self.targets.entry(target.to_string()).or_default().insert(key.to_string(), value.to_string());
    }

    /// Remove an entire target.
    pub fn delete(&mut self, target: &str) -> Result<(), ConfigError> {
        self.targets
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| ConfigError::Malformed(format!("unknown target `{target}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.yaml")).unwrap();
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn set_then_persist_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut cfg = Config::default();
        cfg.set("local", "type", "localDisk");
        cfg.set("local", "path", "/tmp/memorybox");
        cfg.persist(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        let target = reloaded.target("local").unwrap();
        assert_eq!(target.get("type").map(String::as_str), Some("localDisk"));
        assert_eq!(target.get("path").map(String::as_str), Some("/tmp/memorybox"));
    }

    #[test]
    fn delete_unknown_target_is_an_error() {
        let mut cfg = Config::default();
        assert!(cfg.delete("missing").is_err());
    }
}
