// nvrbackup/src/restore/mod.rs
pub(crate) mod apply; // staging-then-swap replacement of the live config directory
pub(crate) mod lock;
pub(crate) mod verification;

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::errors::{AppError, Result};
use crate::store::{ArtifactStore, BackupRecord};

pub use apply::{ConfigApplier, DirectoryApplier};
use lock::{RestoreGuard, RestoreLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub filename: String,
    pub entries: usize,
    pub restart_advised: bool,
}

/// Applies a stored backup as the live configuration, one restore at a time.
pub struct RestoreOrchestrator {
    store: ArtifactStore,
    applier: Arc<dyn ConfigApplier>,
    lock: RestoreLock,
}

impl RestoreOrchestrator {
    pub fn new(store: ArtifactStore, applier: Arc<dyn ConfigApplier>) -> Self {
        Self {
            store,
            applier,
            lock: RestoreLock::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> lock::RestoreState {
        self.lock.state()
    }

    /// Fails fast with `Busy` if another restore holds the lock. Never retried.
    pub async fn restore(&self, filename: &str) -> Result<RestoreReport> {
        let record = self
            .store
            .find(filename)?
            .filter(|r| r.local_present)
            .ok_or_else(|| AppError::NotFound(filename.to_string()))?;

        let guard = self.lock.try_acquire().ok_or(AppError::Busy)?;
        info!("🔄 Restoring configuration from {}", filename);

        match self.apply_locked(&guard, &record).await {
            Ok(entries) => {
                info!("✅ Restore of {} completed, restart advised", filename);
                Ok(RestoreReport {
                    filename: record.filename,
                    entries,
                    restart_advised: true,
                })
            }
            Err(e) => {
                guard.failed();
                error!("❌ Restore of {} failed: {}", filename, e);
                Err(e)
            }
        }
    }

    async fn apply_locked(&self, guard: &RestoreGuard<'_>, record: &BackupRecord) -> Result<usize> {
        let archive = self.store.read(&record.filename)?;
        verification::verify_checksum(record, &archive)?;
        let entries = verification::verify_archive(&archive)?;

        guard.applying();
        self.applier.apply(&archive).await?;
        Ok(entries)
    }
}
