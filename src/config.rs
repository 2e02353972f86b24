//! `config.json`: a missing file gets defaults written out and returned;
//! an existing file deserializes with `#[serde(default)]` on every field
//! so old files gain new keys for free.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_threshold() -> u64 {
    500
}
fn default_size_threshold_bytes() -> u64 {
    600_000
}
fn default_max_backups() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTrimConfig {
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    #[serde(default = "default_size_threshold_bytes")]
    pub size_threshold_bytes: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
}

impl Default for AutoTrimConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            size_threshold_bytes: default_size_threshold_bytes(),
            max_backups: default_max_backups(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub claude_cli_path: Option<String>,
    #[serde(default)]
    pub default_project: Option<String>,
    #[serde(rename = "autoTrim", default)]
    pub auto_trim: AutoTrimConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(EngineError::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body).map_err(|e| EngineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gets_defaults_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.auto_trim.threshold, 500);
        assert_eq!(config.auto_trim.size_threshold_bytes, 600_000);
        assert_eq!(config.auto_trim.max_backups, 5);
        assert!(path.exists());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"autoTrim": {"threshold": 100}}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.auto_trim.threshold, 100);
        assert_eq!(config.auto_trim.max_backups, 5);
    }
}
