// nvrbackup/src/config/mod.rs
pub mod cloud;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub use cloud::{CloudSettings, Credential};

const DEFAULT_BACKUP_DIR: &str = "/backups";
const DEFAULT_CONFIG_DIR: &str = "/config";
const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_RETENTION: usize = 10;
const DEFAULT_CLOUD_TIMEOUT_SECS: u64 = 30;
const CLOUD_STATE_FILE: &str = "cloud_sync.json";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub backup_retention: Option<usize>,
    pub cloud_timeout_secs: Option<u64>,
}

// Application's internal configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Where archives and their sidecars live.
    pub backup_dir: PathBuf,
    /// Live appliance configuration: snapshot source and restore target.
    pub config_dir: PathBuf,
    /// Private state (cloud credential).
    pub data_dir: PathBuf,
    /// Number of local archives kept by rotation.
    pub retention: usize,
    /// Upper bound for any single cloud call.
    pub cloud_timeout: Duration,
}

impl AppConfig {
    /// Reads `config_path` (defaults if the file does not exist) and applies
    /// environment overrides.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let raw_json_config = match fs::read_to_string(config_path) {
            Ok(config_content) => serde_json::from_str::<RawJsonConfig>(&config_content)
                .with_context(|| {
                    format!(
                        "Failed to parse JSON from config file at {}",
                        config_path.display()
                    )
                })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No config file at {}, using defaults",
                    config_path.display()
                );
                RawJsonConfig::default()
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read config file at {}", config_path.display())
                });
            }
        };

        Self::from_raw(raw_json_config, |key| env::var(key).ok())
    }

    /// Merges file values, then environment values on top.
    pub fn from_raw(raw: RawJsonConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path_setting = |key: &str, file_value: Option<PathBuf>, default: &str| -> PathBuf {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(file_value.filter(|p| !p.as_os_str().is_empty()))
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let backup_dir = path_setting("BACKUP_DIR", raw.backup_dir, DEFAULT_BACKUP_DIR);
        let config_dir = path_setting("CONFIG_DIR", raw.config_dir, DEFAULT_CONFIG_DIR);
        let data_dir = path_setting("DATA_DIR", raw.data_dir, DEFAULT_DATA_DIR);

        let retention = match lookup("BACKUP_RETENTION") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("BACKUP_RETENTION must be a positive integer, got '{value}'"))?,
            None => raw.backup_retention.unwrap_or(DEFAULT_RETENTION),
        };
        if retention == 0 {
            anyhow::bail!("backup_retention must be at least 1");
        }

        let timeout_secs = match lookup("CLOUD_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("CLOUD_TIMEOUT_SECS must be a positive integer, got '{value}'"))?,
            None => raw.cloud_timeout_secs.unwrap_or(DEFAULT_CLOUD_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            warn!("cloud_timeout_secs of 0 is not allowed, using {}", DEFAULT_CLOUD_TIMEOUT_SECS);
        }
        let timeout_secs = if timeout_secs == 0 { DEFAULT_CLOUD_TIMEOUT_SECS } else { timeout_secs };

        if backup_dir == config_dir {
            anyhow::bail!(
                "backup_dir and config_dir must differ (both are {})",
                backup_dir.display()
            );
        }

        Ok(AppConfig {
            backup_dir,
            config_dir,
            data_dir,
            retention,
            cloud_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn cloud_state_path(&self) -> PathBuf {
        self.data_dir.join(CLOUD_STATE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_when_nothing_set() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(RawJsonConfig::default(), no_env)?;
        assert_eq!(config.backup_dir, PathBuf::from("/backups"));
        assert_eq!(config.config_dir, PathBuf::from("/config"));
        assert_eq!(config.retention, 10);
        assert_eq!(config.cloud_timeout, Duration::from_secs(30));
        assert_eq!(config.cloud_state_path(), PathBuf::from("/data/cloud_sync.json"));
        Ok(())
    }

    #[test]
    fn test_file_values_are_used() -> anyhow::Result<()> {
        let raw: RawJsonConfig = serde_json::from_value(json!({
            "backup_dir": "/mnt/usb/backups",
            "config_dir": "/opt/nvr/config",
            "backup_retention": 3,
            "cloud_timeout_secs": 5
        }))?;
        let config = AppConfig::from_raw(raw, no_env)?;
        assert_eq!(config.backup_dir, PathBuf::from("/mnt/usb/backups"));
        assert_eq!(config.config_dir, PathBuf::from("/opt/nvr/config"));
        assert_eq!(config.retention, 3);
        assert_eq!(config.cloud_timeout, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn test_environment_overrides_file() -> anyhow::Result<()> {
        let raw: RawJsonConfig = serde_json::from_value(json!({
            "backup_dir": "/from/file",
            "backup_retention": 3
        }))?;
        let env: HashMap<&str, &str> = [("BACKUP_DIR", "/from/env"), ("BACKUP_RETENTION", "7")].into();
        let config = AppConfig::from_raw(raw, |k| env.get(k).map(|v| v.to_string()))?;
        assert_eq!(config.backup_dir, PathBuf::from("/from/env"));
        assert_eq!(config.retention, 7);
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero: RawJsonConfig = serde_json::from_value(json!({ "backup_retention": 0 })).unwrap();
        assert!(AppConfig::from_raw(zero, no_env).is_err());

        assert!(AppConfig::from_raw(RawJsonConfig::default(), |k| {
            (k == "BACKUP_RETENTION").then(|| "many".to_string())
        })
        .is_err());

        let same: RawJsonConfig =
            serde_json::from_value(json!({ "backup_dir": "/x", "config_dir": "/x" })).unwrap();
        assert!(AppConfig::from_raw(same, no_env).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig::load_from_json(&dir.path().join("config.json"));
        assert!(config.is_ok());
        Ok(())
    }
}
