// nvrbackup/src/test_support.rs
// Shared fixtures for the orchestrator, catalog and service tests.
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backup::archive::{create_tar_gz, DirectorySnapshot, SnapshotSource};
use crate::backup::BackupOrchestrator;
use crate::catalog::BackupCatalog;
use crate::cloud::memory::{MemoryRemote, VALID_CREDENTIAL};
use crate::cloud::CloudConnector;
use crate::config::{CloudSettings, Credential};
use crate::errors::Result;
use crate::restore::{ConfigApplier, DirectoryApplier, RestoreOrchestrator};
use crate::store::ArtifactStore;

pub struct StaticSnapshot(pub Vec<u8>);

#[async_trait]
impl SnapshotSource for StaticSnapshot {
    async fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

pub struct Fixture {
    pub _dir: tempfile::TempDir,
    pub store: ArtifactStore,
    pub remote: Arc<MemoryRemote>,
    pub cloud: CloudConnector,
    pub config_dir: PathBuf,
    source: Arc<dyn SnapshotSource>,
    snapshot: Vec<u8>,
}

impl Fixture {
    /// A live config directory with two files and a store that is still empty.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("config dir");
        fs::write(config_dir.join("config.yml"), "cameras:\n  front: {}\n").expect("seed config");
        fs::write(config_dir.join("version"), "0.14\n").expect("seed version");

        let snapshot = create_tar_gz(&config_dir).expect("snapshot");
        Self::build(dir, config_dir, Arc::new(StaticSnapshot(snapshot.clone())), snapshot)
    }

    /// Snapshots a directory that does not exist.
    pub fn with_missing_source() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("config");
        let source = Arc::new(DirectorySnapshot::new(&config_dir));
        Self::build(dir, config_dir, source, Vec::new())
    }

    fn build(dir: tempfile::TempDir, config_dir: PathBuf, source: Arc<dyn SnapshotSource>, snapshot: Vec<u8>) -> Self {
        let store = ArtifactStore::new(dir.path().join("backups"));
        let remote = Arc::new(MemoryRemote::new());
        let cloud = CloudConnector::new(
            remote.clone(),
            Arc::new(CloudSettings::in_memory()),
            Duration::from_millis(200),
        );
        Self {
            _dir: dir,
            store,
            remote,
            cloud,
            config_dir,
            source,
            snapshot,
        }
    }

    pub fn snapshot_bytes(&self) -> Vec<u8> {
        self.snapshot.clone()
    }

    pub async fn activate_cloud(&self) {
        self.cloud
            .configure(Credential::new(VALID_CREDENTIAL))
            .await
            .expect("configure cloud");
        self.cloud.set_enabled(true).expect("enable cloud");
    }

    pub fn backups(&self, retention: usize) -> BackupOrchestrator {
        BackupOrchestrator::new(self.store.clone(), self.cloud.clone(), self.source.clone(), retention)
    }

    pub fn catalog(&self) -> BackupCatalog {
        BackupCatalog::new(self.store.clone(), self.cloud.clone())
    }

    pub fn restores(&self) -> RestoreOrchestrator {
        self.restores_with(Arc::new(DirectoryApplier::new(&self.config_dir)))
    }

    pub fn restores_with(&self, applier: Arc<dyn ConfigApplier>) -> RestoreOrchestrator {
        RestoreOrchestrator::new(self.store.clone(), applier)
    }
}
