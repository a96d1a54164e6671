// nvrbackup/src/service.rs

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backup::{BackupOrchestrator, DirectorySnapshot, SnapshotSource, UploadStatus};
use crate::catalog::BackupCatalog;
use crate::cloud::{CloudConnector, CloudStatus, S3Remote};
use crate::config::{AppConfig, CloudSettings, Credential};
use crate::errors::{AppError, Result};
use crate::restore::{ConfigApplier, DirectoryApplier, RestoreOrchestrator};
use crate::store::{ArtifactStore, BackupRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub ok: bool,
    pub message: String,
    pub record: Option<BackupRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub ok: bool,
    pub message: String,
    pub restart_advised: bool,
}

/// Body of a "configure cloud sync" request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSyncRequest {
    pub enabled: bool,
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl Outcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failed(e: &AppError) -> Self {
        Self {
            ok: false,
            message: e.to_string(),
        }
    }
}

impl BackupOutcome {
    fn failed(e: &AppError) -> Self {
        Self {
            ok: false,
            message: e.to_string(),
            record: None,
        }
    }
}

/// Request-level facade: every operation returns a serializable outcome and
/// nothing it calls can take the process down.
pub struct BackupService {
    store: ArtifactStore,
    cloud: CloudConnector,
    catalog: BackupCatalog,
    backups: Arc<BackupOrchestrator>,
    restores: Arc<RestoreOrchestrator>,
}

impl BackupService {
    /// Wires the production parts: S3 remote, the live config directory as both
    /// snapshot source and restore target. Repairs an interrupted restore first.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let applier = DirectoryApplier::new(&config.config_dir);
        if applier.recover()? {
            warn!("⚠ Recovered configuration left behind by an interrupted restore");
        }

        let settings = CloudSettings::load(&config.cloud_state_path())?;
        let cloud = CloudConnector::new(Arc::new(S3Remote::new()), Arc::new(settings), config.cloud_timeout);
        info!(
            "Backups in {}, configuration in {}, keeping {} local archives",
            config.backup_dir.display(),
            config.config_dir.display(),
            config.retention
        );

        Ok(Self::new(
            ArtifactStore::new(&config.backup_dir),
            cloud,
            Arc::new(DirectorySnapshot::new(&config.config_dir)),
            Arc::new(applier),
            config.retention,
        ))
    }

    pub fn new(
        store: ArtifactStore,
        cloud: CloudConnector,
        source: Arc<dyn SnapshotSource>,
        applier: Arc<dyn ConfigApplier>,
        retention: usize,
    ) -> Self {
        Self {
            catalog: BackupCatalog::new(store.clone(), cloud.clone()),
            backups: Arc::new(BackupOrchestrator::new(store.clone(), cloud.clone(), source, retention)),
            restores: Arc::new(RestoreOrchestrator::new(store.clone(), applier)),
            store,
            cloud,
        }
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.catalog.snapshot().await
    }

    pub async fn run_backup(&self) -> BackupOutcome {
        let backups = self.backups.clone();
        match detached(async move { backups.run_backup().await }).await {
            Ok(run) => {
                let message = match &run.upload {
                    UploadStatus::Skipped => format!("Backup {} created", run.record.filename),
                    UploadStatus::Uploaded => {
                        format!("Backup {} created and uploaded", run.record.filename)
                    }
                    UploadStatus::Failed { message, .. } => format!(
                        "Backup {} created locally; cloud upload failed: {}",
                        run.record.filename, message
                    ),
                };
                BackupOutcome {
                    ok: true,
                    message,
                    record: Some(run.record),
                }
            }
            Err(e) => {
                warn!("⚠ Backup failed: {}", e);
                BackupOutcome::failed(&e)
            }
        }
    }

    /// A credential in the request is verified and stored before the enabled
    /// flag is applied; enabling without any credential is refused.
    pub async fn configure_cloud(&self, request: CloudSyncRequest) -> Outcome {
        let backups = self.backups.clone();
        let result = detached(async move {
            if request.enabled {
                backups.enable(request.credential).await?;
                Ok("Cloud sync enabled")
            } else {
                if let Some(credential) = request.credential {
                    backups.configure(credential).await?;
                }
                backups.disable()?;
                Ok("Cloud sync disabled")
            }
        })
        .await;
        match result {
            Ok(message) => Outcome::ok(message),
            Err(e) => Outcome::failed(&e),
        }
    }

    /// Accepts an uploaded credential document, then stores it and turns sync on.
    pub async fn upload_credential_file(&self, payload: &[u8]) -> Outcome {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.to_string(),
            Err(_) => {
                return Outcome::failed(&AppError::InvalidCredential(
                    "credential file is not UTF-8 text".to_string(),
                ));
            }
        };
        let backups = self.backups.clone();
        match detached(async move { backups.enable(Some(Credential::new(text))).await }).await {
            Ok(()) => Outcome::ok("Credential saved, cloud sync enabled"),
            Err(e) => Outcome::failed(&e),
        }
    }

    /// Forgets the credential and turns sync off. Cloud copies are left in place.
    pub fn clear_cloud(&self) -> Outcome {
        match self.backups.clear() {
            Ok(()) => Outcome::ok("Cloud credential cleared, sync disabled"),
            Err(e) => Outcome::failed(&e),
        }
    }

    pub async fn restore(&self, filename: &str) -> RestoreOutcome {
        let restores = self.restores.clone();
        let filename = filename.to_string();
        match detached(async move { restores.restore(&filename).await }).await {
            Ok(report) => RestoreOutcome {
                ok: true,
                message: format!(
                    "Configuration restored from {} ({} entries). Restart to apply it.",
                    report.filename, report.entries
                ),
                restart_advised: report.restart_advised,
            },
            Err(e) => RestoreOutcome {
                ok: false,
                message: e.to_string(),
                restart_advised: false,
            },
        }
    }

    /// Raw archive bytes for download. Remote-only backups have to be pulled first.
    pub fn fetch(&self, filename: &str) -> Result<Vec<u8>> {
        match self.store.find(filename)? {
            Some(record) if record.local_present => self.store.read(filename),
            _ => Err(AppError::NotFound(filename.to_string())),
        }
    }

    pub fn cloud_status(&self) -> CloudStatus {
        self.cloud.status()
    }

    pub async fn delete(&self, filename: &str, include_remote: bool) -> Outcome {
        let backups = self.backups.clone();
        let name = filename.to_string();
        match detached(async move { backups.delete(&name, include_remote).await }).await {
            Ok(()) if include_remote => Outcome::ok(format!("Deleted {filename} locally and from the cloud")),
            Ok(()) => Outcome::ok(format!("Deleted {filename}")),
            Err(e) => Outcome::failed(&e),
        }
    }

    pub async fn pull(&self, filename: &str) -> BackupOutcome {
        let backups = self.backups.clone();
        let name = filename.to_string();
        match detached(async move { backups.pull(&name).await }).await {
            Ok(record) => BackupOutcome {
                ok: true,
                message: format!("{} is available locally", record.filename),
                record: Some(record),
            },
            Err(e) => BackupOutcome::failed(&e),
        }
    }

    pub async fn purge(&self) -> Outcome {
        let backups = self.backups.clone();
        match detached(async move { backups.purge_unreachable().await }).await {
            Ok(purged) => Outcome::ok(format!("Purged {} unreachable backups", purged.len())),
            Err(e) => Outcome::failed(&e),
        }
    }
}

/// Runs an operation as its own task so a dropped caller cannot cancel it halfway.
async fn detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| AppError::TaskFailed(e.to_string()))?
}
