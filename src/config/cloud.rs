// nvrbackup/src/config/cloud.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::errors::Result;
use crate::utils::atomic_write_private;

/// Opaque provider credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Cloud sync settings. `enabled` and `configured` move independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudConfig {
    pub enabled: bool,
    pub configured: bool,
    credential: Option<Credential>,
}

impl CloudConfig {
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Uploads and existence checks only happen in this state.
    pub fn is_active(&self) -> bool {
        self.enabled && self.configured
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCloudState {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    credential: Option<Credential>,
}

/// Shared handle over the process-wide [`CloudConfig`].
///
/// Every mutation is written through to the state file (owner-only permissions)
/// before it becomes visible to readers.
#[derive(Debug)]
pub struct CloudSettings {
    path: Option<PathBuf>,
    state: RwLock<CloudConfig>,
}

impl CloudSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let persisted = match fs::read(path) {
            Ok(content) => serde_json::from_slice::<PersistedCloudState>(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => PersistedCloudState::default(),
            Err(e) => return Err(e.into()),
        };
        let credential = persisted.credential.filter(|c| !c.is_empty());

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: RwLock::new(CloudConfig {
                enabled: persisted.enabled,
                configured: credential.is_some(),
                credential,
            }),
        })
    }

    /// Settings that live only as long as the process.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(CloudConfig::default()),
        }
    }

    pub fn current(&self) -> CloudConfig {
        self.read().clone()
    }

    pub(crate) fn store_credential(&self, credential: Credential) -> Result<()> {
        let mut state = self.write();
        let mut next = state.clone();
        next.credential = Some(credential);
        next.configured = true;
        self.persist(&next)?;
        *state = next;
        info!("Cloud credential stored");
        Ok(())
    }

    pub(crate) fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.write();
        if state.enabled == enabled {
            return Ok(());
        }
        let mut next = state.clone();
        next.enabled = enabled;
        self.persist(&next)?;
        *state = next;
        info!("Cloud sync {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Drops the credential and disables sync.
    pub(crate) fn clear(&self) -> Result<()> {
        let mut state = self.write();
        let next = CloudConfig::default();
        self.persist(&next)?;
        *state = next;
        info!("Cloud credential cleared");
        Ok(())
    }

    fn persist(&self, config: &CloudConfig) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = PersistedCloudState {
            enabled: config.enabled,
            credential: config.credential.clone(),
        };
        atomic_write_private(path, &serde_json::to_vec_pretty(&persisted)?)?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, CloudConfig> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CloudConfig> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
