// nvrbackup/src/cloud/mod.rs
pub(crate) mod s3; // S3-compatible provider (Spaces, MinIO, AWS)
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{CloudSettings, Credential};
use crate::errors::{AppError, Result};
use crate::store::{is_archive_name, RemotePresence};

pub use s3::S3Remote;

/// How a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderErrorKind {
    /// Connection refused, DNS, 5xx.
    Network,
    /// No answer within the bound; the call may or may not have landed.
    Timeout,
    /// Credential rejected.
    Unauthorized,
    /// Storage quota exhausted.
    QuotaExceeded,
    /// The object does not exist.
    NotFound,
    /// Any other definitive rejection.
    Rejected,
}

impl ProviderErrorKind {
    pub fn is_retriable(self) -> bool {
        matches!(self, ProviderErrorKind::Network | ProviderErrorKind::Timeout)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::Network => "network, retriable",
            ProviderErrorKind::Timeout => "timeout, retriable",
            ProviderErrorKind::Unauthorized => "unauthorized",
            ProviderErrorKind::QuotaExceeded => "quota exceeded",
            ProviderErrorKind::NotFound => "not found",
            ProviderErrorKind::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// One object in the backup folder of the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub filename: String,
    pub size_bytes: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// A remote object store. Implementations receive the credential on every call;
/// anything they cache must be keyed by it so a rotated credential takes effect.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rejects malformed credentials before any network traffic.
    fn parse_credential(&self, credential: &Credential) -> std::result::Result<(), String>;

    /// Proves the credential works against the provider.
    async fn verify(&self, credential: &Credential) -> ProviderResult<()>;

    async fn upload(&self, credential: &Credential, filename: &str, content: Vec<u8>) -> ProviderResult<()>;

    async fn exists(&self, credential: &Credential, filename: &str) -> ProviderResult<bool>;

    async fn download(&self, credential: &Credential, filename: &str) -> ProviderResult<Vec<u8>>;

    async fn delete(&self, credential: &Credential, filename: &str) -> ProviderResult<()>;

    /// Every object directly inside the credential's backup folder.
    async fn list(&self, credential: &Credential) -> ProviderResult<Vec<RemoteObject>>;
}

/// Status block for callers that render the cloud panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudStatus {
    pub enabled: bool,
    pub configured: bool,
    pub provider: &'static str,
    pub message: String,
}

/// Applies the shared [`CloudSettings`] and a per-call timeout to a [`RemoteStore`].
#[derive(Clone)]
pub struct CloudConnector {
    remote: Arc<dyn RemoteStore>,
    settings: Arc<CloudSettings>,
    timeout: Duration,
}

impl CloudConnector {
    pub fn new(remote: Arc<dyn RemoteStore>, settings: Arc<CloudSettings>, timeout: Duration) -> Self {
        Self {
            remote,
            settings,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn settings(&self) -> &CloudSettings {
        &self.settings
    }

    pub fn is_configured(&self) -> bool {
        self.settings.current().configured
    }

    pub fn is_active(&self) -> bool {
        self.settings.current().is_active()
    }

    pub fn status(&self) -> CloudStatus {
        let current = self.settings.current();
        let message = match (current.enabled, current.configured) {
            (false, _) => format!("{} sync disabled", self.remote.name()),
            (true, false) => "Enabled but no credential configured".to_string(),
            (true, true) => "Active".to_string(),
        };
        CloudStatus {
            enabled: current.enabled,
            configured: current.configured,
            provider: self.remote.name(),
            message,
        }
    }

    /// Validates, verifies and stores a credential. Only a verified credential
    /// flips `configured`.
    pub async fn configure(&self, credential: Credential) -> Result<()> {
        if credential.is_empty() {
            return Err(AppError::InvalidCredential("credential is empty".to_string()));
        }
        self.remote
            .parse_credential(&credential)
            .map_err(AppError::InvalidCredential)?;

        match self.bounded(self.remote.verify(&credential)).await {
            Ok(()) => {}
            Err(e) => {
                warn!("⚠ {} rejected the credential: {}", self.remote.name(), e);
                return Err(AppError::AuthFailure {
                    message: e.message,
                    retriable: e.kind.is_retriable(),
                });
            }
        }

        self.settings.store_credential(credential)?;
        info!("✓ {} credential verified and stored", self.remote.name());
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.settings.set_enabled(enabled)
    }

    pub fn clear(&self) -> Result<()> {
        self.settings.clear()
    }

    pub async fn upload(&self, filename: &str, content: Vec<u8>) -> Result<()> {
        let credential = self.active_credential()?;
        info!("Uploading {} to {} ({} bytes)", filename, self.remote.name(), content.len());
        self.bounded(self.remote.upload(&credential, filename, content))
            .await
            .map_err(|e| AppError::UploadFailure {
                kind: e.kind,
                message: e.message,
            })?;
        info!("✓ Uploaded {} to {}", filename, self.remote.name());
        Ok(())
    }

    /// Never fails: anything short of a definitive answer is `NotApplicable`.
    pub async fn exists(&self, filename: &str) -> RemotePresence {
        let Ok(credential) = self.active_credential() else {
            return RemotePresence::NotApplicable;
        };
        match self.bounded(self.remote.exists(&credential, filename)).await {
            Ok(true) => RemotePresence::Present,
            Ok(false) => RemotePresence::Absent,
            Err(e) => {
                warn!("⚠ Could not check {} on {}: {}", filename, self.remote.name(), e);
                RemotePresence::NotApplicable
            }
        }
    }

    pub async fn download(&self, filename: &str) -> Result<Vec<u8>> {
        let credential = self.active_credential()?;
        self.bounded(self.remote.download(&credential, filename))
            .await
            .map_err(|e| match e.kind {
                ProviderErrorKind::NotFound => AppError::NotFound(filename.to_string()),
                kind => AppError::Cloud {
                    kind,
                    message: e.message,
                },
            })
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        let credential = self.active_credential()?;
        match self.bounded(self.remote.delete(&credential, filename)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind == ProviderErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Cloud {
                kind: e.kind,
                message: e.message,
            }),
        }
    }

    /// Archives held remotely. Objects that are not backup archives are skipped.
    pub async fn list(&self) -> Result<Vec<RemoteObject>> {
        let credential = self.active_credential()?;
        let objects = self
            .bounded(self.remote.list(&credential))
            .await
            .map_err(|e| AppError::Cloud {
                kind: e.kind,
                message: e.message,
            })?;
        Ok(objects
            .into_iter()
            .filter(|o| is_archive_name(&o.filename))
            .collect())
    }

    fn active_credential(&self) -> Result<Credential> {
        let current = self.settings.current();
        if !current.is_active() {
            return Err(AppError::NotConfigured);
        }
        current.credential().cloned().ok_or(AppError::NotConfigured)
    }

    async fn bounded<T>(&self, call: impl Future<Output = ProviderResult<T>>) -> ProviderResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                ProviderErrorKind::Timeout,
                format!(
                    "{} did not respond within {} seconds",
                    self.remote.name(),
                    self.timeout.as_secs_f32()
                ),
            )),
        }
    }
}
