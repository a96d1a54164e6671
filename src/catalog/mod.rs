// nvrbackup/src/catalog/mod.rs
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::cloud::{CloudConnector, RemoteObject};
use crate::errors::Result;
use crate::store::{remote_only_record, sort_newest_first, ArtifactStore, BackupRecord, RemotePresence};

/// Per-object existence checks in flight at once when the listing is unavailable.
const PRESENCE_CHECKS: usize = 4;

/// Merged local + remote view of all backups. Read-only over the artifact
/// store and the cloud connector.
#[derive(Clone)]
pub struct BackupCatalog {
    store: ArtifactStore,
    cloud: CloudConnector,
}

impl BackupCatalog {
    pub fn new(store: ArtifactStore, cloud: CloudConnector) -> Self {
        Self { store, cloud }
    }

    /// Newest first. Every returned record is restorable either locally or from the cloud.
    pub async fn snapshot(&self) -> Result<Vec<BackupRecord>> {
        let mut records = self.store.list()?;

        if self.cloud.is_active() {
            match self.cloud.list().await {
                Ok(objects) => merge_listing(&mut records, objects),
                Err(e) => {
                    warn!("⚠ Cloud listing failed, checking backups one by one: {}", e);
                    self.check_each(&mut records).await;
                }
            }
        } else {
            for record in &mut records {
                record.remote_present = RemotePresence::NotApplicable;
            }
        }

        let before = records.len();
        records.retain(|r| !r.is_unreachable());
        if records.len() != before {
            debug!("Catalog hid {} unreachable records", before - records.len());
        }
        Ok(records)
    }

    async fn check_each(&self, records: &mut [BackupRecord]) {
        let presence: Vec<RemotePresence> = stream::iter(records.iter())
            .map(|r| self.cloud.exists(&r.filename))
            .buffered(PRESENCE_CHECKS)
            .collect()
            .await;
        for (record, remote_present) in records.iter_mut().zip(presence) {
            record.remote_present = remote_present;
        }
    }
}

/// Marks each local record present or absent against a full listing and adds
/// the objects only the remote store knows about.
fn merge_listing(records: &mut Vec<BackupRecord>, objects: Vec<RemoteObject>) {
    let mut remote: HashMap<String, RemoteObject> =
        objects.into_iter().map(|o| (o.filename.clone(), o)).collect();

    for record in records.iter_mut() {
        record.remote_present = match remote.remove(&record.filename) {
            Some(_) => RemotePresence::Present,
            None => RemotePresence::Absent,
        };
    }

    if !remote.is_empty() {
        debug!("Discovered {} backups held only in the cloud", remote.len());
        records.extend(
            remote
                .into_values()
                .map(|o| remote_only_record(&o.filename, o.modified)),
        );
        sort_newest_first(records);
    }
}
