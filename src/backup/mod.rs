// nvrbackup/src/backup/mod.rs
pub(crate) mod archive; // tar.gz snapshots of the config directory

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cloud::{CloudConnector, ProviderErrorKind};
use crate::config::Credential;
use crate::errors::{AppError, Result};
use crate::store::{is_archive_name, ArtifactStore, BackupRecord, RemotePresence};

pub use archive::{DirectorySnapshot, SnapshotSource};

/// What happened to the cloud copy during a backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UploadStatus {
    Skipped,
    Uploaded,
    Failed { retriable: bool, message: String },
}

#[derive(Debug, Clone)]
pub struct BackupRun {
    pub record: BackupRecord,
    pub upload: UploadStatus,
}

/// Creates backups and owns the cloud sync lifecycle.
pub struct BackupOrchestrator {
    store: ArtifactStore,
    cloud: CloudConnector,
    source: Arc<dyn SnapshotSource>,
    retention: usize,
}

impl BackupOrchestrator {
    pub fn new(
        store: ArtifactStore,
        cloud: CloudConnector,
        source: Arc<dyn SnapshotSource>,
        retention: usize,
    ) -> Self {
        Self {
            store,
            cloud,
            source,
            retention: retention.max(1),
        }
    }

    /// Local copy first; the cloud copy is best effort and never fails the run.
    pub async fn run_backup(&self) -> Result<BackupRun> {
        info!("🚀 Starting backup");
        let snapshot = self.source.snapshot().await?;
        let mut record = self.store.create(&snapshot)?;

        let upload = if self.cloud.is_active() {
            match self.cloud.upload(&record.filename, snapshot).await {
                Ok(()) => {
                    record.remote_present = RemotePresence::Present;
                    UploadStatus::Uploaded
                }
                Err(e) => {
                    warn!("⚠ Backup {} kept locally, cloud upload failed: {}", record.filename, e);
                    record.remote_present = match &e {
                        // The object may have landed; we cannot say it is absent.
                        AppError::UploadFailure {
                            kind: ProviderErrorKind::Timeout,
                            ..
                        } => RemotePresence::NotApplicable,
                        _ => RemotePresence::Absent,
                    };
                    UploadStatus::Failed {
                        retriable: e.is_retriable(),
                        message: e.to_string(),
                    }
                }
            }
        } else {
            UploadStatus::Skipped
        };

        if let Err(e) = self.rotate().await {
            warn!("⚠ Retention rotation failed: {}", e);
        }

        info!("✅ Backup {} completed", record.filename);
        Ok(BackupRun { record, upload })
    }

    /// Verifies and stores a credential without changing the enabled flag.
    pub async fn configure(&self, credential: Credential) -> Result<()> {
        self.cloud.configure(credential).await
    }

    /// Turns sync on. Without a new credential this only works if one is already configured.
    pub async fn enable(&self, credential: Option<Credential>) -> Result<()> {
        match credential {
            Some(credential) => self.cloud.configure(credential).await?,
            None if !self.cloud.is_configured() => return Err(AppError::NotConfigured),
            None => {}
        }
        self.cloud.set_enabled(true)
    }

    /// Turns sync off. Remote copies are left alone.
    pub fn disable(&self) -> Result<()> {
        self.cloud.set_enabled(false)
    }

    pub fn clear(&self) -> Result<()> {
        self.cloud.clear()
    }

    /// Keeps the newest `retention` local archives. Older archives stay
    /// catalogued as remote-only unless the cloud copy is confirmed absent or
    /// sync is off.
    pub async fn rotate(&self) -> Result<Vec<String>> {
        let expired: Vec<BackupRecord> = self
            .store
            .list()?
            .into_iter()
            .filter(|r| r.local_present)
            .skip(self.retention)
            .collect();

        let mut rotated = Vec::with_capacity(expired.len());
        for record in expired {
            match self.cloud.exists(&record.filename).await {
                RemotePresence::Present => self.store.evict_local(&record.filename)?,
                RemotePresence::NotApplicable if self.cloud.is_active() => {
                    // Purge drops the sidecar later if the copy turns out to be missing.
                    warn!("⚠ Cloud copy of {} could not be confirmed, keeping it catalogued", record.filename);
                    self.store.evict_local(&record.filename)?;
                }
                _ => self.store.delete(&record.filename)?,
            }
            info!("Removed old backup: {}", record.filename);
            rotated.push(record.filename);
        }
        Ok(rotated)
    }

    /// Deletes a backup locally and, if asked, from the remote store too.
    /// Only names the catalog could show are accepted.
    pub async fn delete(&self, filename: &str, include_remote: bool) -> Result<()> {
        if !is_archive_name(filename) {
            return Err(AppError::NotFound(filename.to_string()));
        }
        let known_locally = self.store.find(filename)?.is_some();
        if include_remote {
            if !known_locally && self.cloud.exists(filename).await != RemotePresence::Present {
                return Err(AppError::NotFound(filename.to_string()));
            }
            self.cloud.delete(filename).await?;
        } else if !known_locally {
            return Err(AppError::NotFound(filename.to_string()));
        }
        self.store.delete(filename)
    }

    /// Downloads a remote-only artifact back into the local store. Objects
    /// without a sidecar (uploaded by another appliance, or before a reinstall)
    /// are taken in with a fresh one.
    pub async fn pull(&self, filename: &str) -> Result<BackupRecord> {
        if !is_archive_name(filename) {
            return Err(AppError::NotFound(filename.to_string()));
        }
        match self.store.find(filename)? {
            Some(record) if record.local_present => Ok(record),
            Some(_) => {
                info!("Downloading {} from the cloud", filename);
                let content = self.cloud.download(filename).await?;
                let mut record = self.store.restore_local(filename, &content)?;
                record.remote_present = RemotePresence::Present;
                Ok(record)
            }
            None => {
                let object = self
                    .cloud
                    .list()
                    .await?
                    .into_iter()
                    .find(|o| o.filename == filename)
                    .ok_or_else(|| AppError::NotFound(filename.to_string()))?;
                info!("Downloading uncatalogued {} from the cloud", filename);
                let content = self.cloud.download(filename).await?;
                let mut record = self.store.adopt(filename, &content, object.modified)?;
                record.remote_present = RemotePresence::Present;
                Ok(record)
            }
        }
    }

    /// Forgets sidecars whose archive is gone and whose cloud copy is confirmed absent.
    /// Does nothing while cloud sync is inactive, since absence cannot be confirmed.
    pub async fn purge_unreachable(&self) -> Result<Vec<String>> {
        if !self.cloud.is_active() {
            return Ok(Vec::new());
        }
        let orphans: Vec<BackupRecord> = self.store.list()?.into_iter().filter(|r| !r.local_present).collect();
        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        let listed: Option<HashSet<String>> = match self.cloud.list().await {
            Ok(objects) => Some(objects.into_iter().map(|o| o.filename).collect()),
            Err(e) => {
                warn!("⚠ Cloud listing failed, checking backups one by one: {}", e);
                None
            }
        };

        let mut purged = Vec::new();
        for record in orphans {
            let absent = match &listed {
                Some(names) => !names.contains(&record.filename),
                None => self.cloud.exists(&record.filename).await == RemotePresence::Absent,
            };
            if absent {
                self.store.forget(&record.filename)?;
                info!("Purged unreachable backup {}", record.filename);
                purged.push(record.filename);
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::VALID_CREDENTIAL;
    use crate::test_support::Fixture;

    #[tokio::test]
    async fn test_backup_without_cloud_is_local_only() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let run = fx.backups(10).run_backup().await?;

        assert!(run.record.local_present);
        assert_eq!(run.record.remote_present, RemotePresence::NotApplicable);
        assert_eq!(run.upload, UploadStatus::Skipped);
        assert_eq!(fx.remote.upload_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_round_trips_snapshot_bytes() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let run = fx.backups(10).run_backup().await?;
        assert_eq!(fx.store.read(&run.record.filename)?, fx.snapshot_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_uploads_when_active() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;

        let run = fx.backups(10).run_backup().await?;

        assert_eq!(run.record.remote_present, RemotePresence::Present);
        assert_eq!(run.upload, UploadStatus::Uploaded);
        assert!(fx.remote.contains(&run.record.filename));
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_local_backup() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        fx.remote.fail_upload(Some(ProviderErrorKind::Network));

        let run = fx.backups(10).run_backup().await?;

        assert!(run.record.local_present);
        assert_eq!(run.record.remote_present, RemotePresence::Absent);
        assert!(matches!(run.upload, UploadStatus::Failed { retriable: true, .. }));
        assert_eq!(fx.store.read(&run.record.filename)?, fx.snapshot_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_timeout_leaves_presence_unknown() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        fx.remote.stall(true);

        let run = fx.backups(10).run_backup().await?;

        assert!(run.record.local_present);
        assert_eq!(run.record.remote_present, RemotePresence::NotApplicable);
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_failure_fails_backup() {
        let fx = Fixture::with_missing_source();
        let result = fx.backups(10).run_backup().await;
        assert!(result.is_err());
        assert!(fx.store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_backups_get_distinct_names() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backups = fx.backups(10);
        let (a, b) = tokio::join!(backups.run_backup(), backups.run_backup());
        assert_ne!(a?.record.filename, b?.record.filename);
        assert_eq!(fx.store.list()?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_enable_requires_existing_or_new_credential() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backups = fx.backups(10);

        assert!(matches!(backups.enable(None).await, Err(AppError::NotConfigured)));
        assert!(!fx.cloud.is_active());

        backups.enable(Some(Credential::new(VALID_CREDENTIAL))).await?;
        assert!(fx.cloud.is_active());

        backups.disable()?;
        assert!(!fx.cloud.is_active());
        assert!(fx.cloud.is_configured());

        // Re-enable on the stored credential.
        backups.enable(None).await?;
        assert!(fx.cloud.is_active());
        Ok(())
    }

    #[tokio::test]
    async fn test_enable_with_rejected_credential_stays_disabled() {
        let fx = Fixture::new();
        let err = fx
            .backups(10)
            .enable(Some(Credential::new(r#"{"token":"expired"}"#)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthFailure { .. }));
        let status = fx.cloud.status();
        assert!(!status.enabled);
        assert!(!status.configured);
    }

    #[tokio::test]
    async fn test_rotation_keeps_newest_locally() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backups = fx.backups(2);
        let first = backups.run_backup().await?.record;
        backups.run_backup().await?;
        backups.run_backup().await?;

        let listed = fx.store.list()?;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.filename != first.filename));
        Ok(())
    }

    #[tokio::test]
    async fn test_rotation_keeps_remote_copies_catalogued() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(1);
        let first = backups.run_backup().await?.record;
        backups.run_backup().await?;

        let evicted = fx
            .store
            .find(&first.filename)?
            .expect("sidecar kept for remote copy");
        assert!(!evicted.local_present);
        assert!(fx.remote.contains(&first.filename));
        Ok(())
    }

    #[tokio::test]
    async fn test_pull_brings_remote_copy_back() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(10);
        let record = backups.run_backup().await?.record;
        fx.store.evict_local(&record.filename)?;

        let pulled = backups.pull(&record.filename).await?;

        assert!(pulled.local_present);
        assert_eq!(fx.store.read(&record.filename)?, fx.snapshot_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_forgets_only_confirmed_absent() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(10);
        let gone = backups.run_backup().await?.record;
        let kept = backups.run_backup().await?.record;
        fx.store.evict_local(&gone.filename)?;
        fx.store.evict_local(&kept.filename)?;
        fx.remote.remove(&gone.filename);

        let purged = backups.purge_unreachable().await?;

        assert_eq!(purged, vec![gone.filename.clone()]);
        assert!(fx.store.find(&gone.filename)?.is_none());
        assert!(fx.store.find(&kept.filename)?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_is_a_no_op_while_provider_unreachable() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(10);
        let record = backups.run_backup().await?.record;
        fx.store.evict_local(&record.filename)?;
        fx.remote.remove(&record.filename);
        fx.remote.fail_list(Some(ProviderErrorKind::Network));
        fx.remote.fail_exists(Some(ProviderErrorKind::Network));

        assert!(backups.purge_unreachable().await?.is_empty());
        assert!(fx.store.find(&record.filename)?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_works_from_listing() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(10);
        let gone = backups.run_backup().await?.record;
        let kept = backups.run_backup().await?.record;
        fx.store.evict_local(&gone.filename)?;
        fx.store.evict_local(&kept.filename)?;
        fx.remote.remove(&gone.filename);
        // Per-object checks are down; the listing alone decides.
        fx.remote.fail_exists(Some(ProviderErrorKind::Network));

        let purged = backups.purge_unreachable().await?;

        assert_eq!(purged, vec![gone.filename.clone()]);
        assert!(fx.store.find(&kept.filename)?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_rotation_with_unconfirmed_cloud_copy_keeps_sidecar() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(1);
        let first = backups.run_backup().await?.record;
        fx.remote.fail_exists(Some(ProviderErrorKind::Network));
        let second = backups.run_backup().await?.record;
        fx.remote.fail_exists(None);

        let evicted = fx
            .store
            .find(&first.filename)?
            .expect("sidecar kept while the cloud copy was unconfirmed");
        assert!(!evicted.local_present);

        let names: Vec<String> = fx.catalog().snapshot().await?.into_iter().map(|r| r.filename).collect();
        assert_eq!(names, vec![second.filename, first.filename]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rotation_without_sync_deletes_outright() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(1);
        let first = backups.run_backup().await?.record;
        fx.cloud.set_enabled(false)?;
        backups.run_backup().await?;

        assert!(fx.store.find(&first.filename)?.is_none());
        assert!(fx.remote.contains(&first.filename));
        Ok(())
    }

    #[tokio::test]
    async fn test_pull_takes_in_object_without_sidecar() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let name = "config_backup_2021-06-01_12-00-00_0badf00d.tar.gz";
        fx.remote.insert(name, fx.snapshot_bytes());
        let backups = fx.backups(10);

        let pulled = backups.pull(name).await?;

        assert!(pulled.local_present);
        assert_eq!(pulled.remote_present, RemotePresence::Present);
        assert_eq!(fx.store.read(name)?, fx.snapshot_bytes());
        assert!(fx.store.find(name)?.and_then(|r| r.sha256).is_some());
        fx.restores().restore(name).await?;

        assert!(matches!(
            backups.pull("config_backup_2021-06-01_12-00-00_missing0.tar.gz").await,
            Err(AppError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_rejects_uncatalogued_remote_keys() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        fx.remote.insert("unrelated/object.bin", b"someone else's data".to_vec());
        fx.remote.insert("notes.tar.gz.bak", b"x".to_vec());
        let backups = fx.backups(10);

        for name in ["unrelated/object.bin", "notes.tar.gz.bak", "config_backup_never_made.tar.gz"] {
            assert!(matches!(backups.delete(name, true).await, Err(AppError::NotFound(_))));
        }
        assert!(fx.remote.contains("unrelated/object.bin"));
        assert!(fx.remote.contains("notes.tar.gz.bak"));

        // A cloud-only backup the catalog shows can still be removed.
        let listed = "config_backup_2022-03-04_05-06-07_cafe0001.tar.gz";
        fx.remote.insert(listed, b"x".to_vec());
        backups.delete(listed, true).await?;
        assert!(!fx.remote.contains(listed));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_delete_of_remote_only_backup_stays_discoverable() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(10);
        let record = backups.run_backup().await?.record;
        fx.store.evict_local(&record.filename)?;

        backups.delete(&record.filename, false).await?;

        assert!(fx.store.find(&record.filename)?.is_none());
        let records = fx.catalog().snapshot().await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, record.filename);
        assert!(!records[0].local_present);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_with_remote() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.activate_cloud().await;
        let backups = fx.backups(10);
        let record = backups.run_backup().await?.record;

        backups.delete(&record.filename, true).await?;

        assert!(!fx.remote.contains(&record.filename));
        assert!(fx.store.find(&record.filename)?.is_none());
        assert!(matches!(
            backups.delete(&record.filename, false).await,
            Err(AppError::NotFound(_))
        ));
        Ok(())
    }
}
