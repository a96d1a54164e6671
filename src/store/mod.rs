// nvrbackup/src/store/mod.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::utils::{atomic_write, is_valid_filename, sha256_hex, TEMP_PREFIX};

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const META_SUFFIX: &str = ".meta.json";
const NAME_PREFIX: &str = "config_backup_";
const NAME_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";

/// True for names the store could have produced or listed: a safe bare file
/// name ending in `.tar.gz`.
pub fn is_archive_name(name: &str) -> bool {
    name.ends_with(ARCHIVE_SUFFIX) && is_valid_filename(name)
}

/// Creation time encoded in a generated archive name, if it is one.
fn created_at_from_name(filename: &str) -> Option<DateTime<Utc>> {
    let stamp = filename.strip_prefix(NAME_PREFIX)?.get(..19)?;
    chrono::NaiveDateTime::parse_from_str(stamp, NAME_TIMESTAMP)
        .ok()
        .map(|naive| naive.and_utc())
}

fn display_name_for(created_at: DateTime<Utc>) -> String {
    format!("Backup {}", created_at.format("%Y-%m-%d %H:%M:%S"))
}

/// Record for an object that only the remote store knows about.
pub fn remote_only_record(filename: &str, modified: Option<DateTime<Utc>>) -> BackupRecord {
    let created_at = created_at_from_name(filename).or(modified).unwrap_or_default();
    let display_name = match created_at_from_name(filename) {
        Some(at) => display_name_for(at),
        None => filename.to_string(),
    };
    BackupRecord {
        filename: filename.to_string(),
        display_name,
        created_at,
        size_bytes: None,
        local_present: false,
        remote_present: RemotePresence::Present,
        sha256: None,
    }
}

/// Whether the remote store holds a copy of an artifact.
///
/// `NotApplicable` covers both "cloud sync is off" and "the provider could not
/// answer"; only `Absent` is a confirmed negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemotePresence {
    Present,
    Absent,
    NotApplicable,
}

/// One backup artifact as seen by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub filename: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
    pub local_present: bool,
    pub remote_present: RemotePresence,
    #[serde(skip)]
    pub sha256: Option<String>,
}

impl BackupRecord {
    /// A record nobody can restore from.
    pub fn is_unreachable(&self) -> bool {
        !self.local_present && self.remote_present != RemotePresence::Present
    }
}

/// Sidecar persisted next to each archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveMetadata {
    filename: String,
    display_name: String,
    created_at: DateTime<Utc>,
    size_bytes: u64,
    sha256: String,
}

impl ArchiveMetadata {
    fn into_record(self, local_present: bool) -> BackupRecord {
        BackupRecord {
            filename: self.filename,
            display_name: self.display_name,
            created_at: self.created_at,
            size_bytes: local_present.then_some(self.size_bytes),
            local_present,
            remote_present: RemotePresence::NotApplicable,
            sha256: Some(self.sha256),
        }
    }
}

/// Filesystem-backed store: one archive per backup plus a JSON sidecar.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists a new snapshot and returns its record (remote presence not yet known).
    pub fn create(&self, snapshot: &[u8]) -> Result<BackupRecord> {
        self.create_at(Utc::now(), snapshot)
    }

    pub(crate) fn create_at(&self, created_at: DateTime<Utc>, snapshot: &[u8]) -> Result<BackupRecord> {
        let suffix = Uuid::new_v4().simple().to_string();
        let filename = format!(
            "{}{}_{}{}",
            NAME_PREFIX,
            created_at.format(NAME_TIMESTAMP),
            &suffix[..8],
            ARCHIVE_SUFFIX
        );
        if self.archive_path(&filename).exists() {
            return Err(AppError::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("Archive already exists: {filename}"),
            )));
        }
        self.write_new(filename, created_at, snapshot)
    }

    /// Takes in an archive that has no sidecar yet (a cloud-only object being
    /// pulled back). The checksum is computed from `content`.
    pub fn adopt(&self, filename: &str, content: &[u8], modified: Option<DateTime<Utc>>) -> Result<BackupRecord> {
        if !is_archive_name(filename) {
            return Err(AppError::NotFound(filename.to_string()));
        }
        let created_at = created_at_from_name(filename)
            .or(modified)
            .unwrap_or_else(Utc::now);
        self.write_new(filename.to_string(), created_at, content)
    }

    fn write_new(&self, filename: String, created_at: DateTime<Utc>, content: &[u8]) -> Result<BackupRecord> {
        fs::create_dir_all(&self.dir)?;
        let archive_path = self.archive_path(&filename);

        let meta = ArchiveMetadata {
            display_name: display_name_for(created_at),
            filename,
            created_at,
            size_bytes: content.len() as u64,
            sha256: sha256_hex(content),
        };

        atomic_write(&archive_path, content)?;
        if let Err(e) = self.write_meta(&meta) {
            // Without a sidecar the archive would surface with guessed metadata.
            let _ = fs::remove_file(&archive_path);
            return Err(e);
        }

        info!("✓ Archive {} written ({} bytes)", meta.filename, meta.size_bytes);
        Ok(meta.into_record(true))
    }

    /// All known artifacts, newest first. Remote presence is always `NotApplicable` here.
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives: HashMap<String, fs::Metadata> = HashMap::new();
        let mut sidecars: Vec<String> = Vec::new();

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            if let Some(filename) = name.strip_suffix(META_SUFFIX) {
                if is_valid_filename(filename) {
                    sidecars.push(filename.to_string());
                }
            } else if is_archive_name(&name) {
                let metadata = entry.metadata()?;
                if metadata.is_file() {
                    archives.insert(name, metadata);
                }
            }
        }

        let mut records = Vec::with_capacity(archives.len().max(sidecars.len()));
        for filename in sidecars {
            match self.read_meta(&filename) {
                Ok(Some(meta)) => {
                    let local_present = archives.remove(&filename).is_some();
                    records.push(meta.into_record(local_present));
                }
                Ok(None) => {}
                Err(e) => warn!("⚠ Ignoring unreadable sidecar for {}: {}", filename, e),
            }
        }

        // Archives dropped in by hand or written before sidecars existed.
        for (filename, metadata) in archives {
            debug!("Synthesizing metadata for {}", filename);
            records.push(synthesized_record(filename, &metadata));
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Looks up a single artifact without scanning the whole directory.
    pub fn find(&self, filename: &str) -> Result<Option<BackupRecord>> {
        if !is_valid_filename(filename) {
            return Ok(None);
        }
        let local = self.archive_path(filename).is_file();
        match self.read_meta(filename) {
            Ok(Some(meta)) => Ok(Some(meta.into_record(local))),
            Ok(None) | Err(AppError::SerdeJson(_)) if local => {
                let metadata = fs::metadata(self.archive_path(filename))?;
                Ok(Some(synthesized_record(filename.to_string(), &metadata)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        if !is_valid_filename(filename) {
            return Err(AppError::NotFound(filename.to_string()));
        }
        match fs::read(self.archive_path(filename)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(filename.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes archive and sidecar. Missing files are not an error.
    pub fn delete(&self, filename: &str) -> Result<()> {
        if !is_valid_filename(filename) {
            return Ok(());
        }
        remove_if_exists(&self.archive_path(filename))?;
        remove_if_exists(&self.meta_path(filename))?;
        info!("Deleted backup {}", filename);
        Ok(())
    }

    /// Drops the local archive but keeps the sidecar so a remote copy stays catalogued.
    pub fn evict_local(&self, filename: &str) -> Result<()> {
        if !is_valid_filename(filename) {
            return Ok(());
        }
        remove_if_exists(&self.archive_path(filename))?;
        info!("Evicted local copy of {}", filename);
        Ok(())
    }

    /// Drops only the sidecar.
    pub fn forget(&self, filename: &str) -> Result<()> {
        if !is_valid_filename(filename) {
            return Ok(());
        }
        remove_if_exists(&self.meta_path(filename))
    }

    /// Writes back an archive for an artifact whose sidecar is still known,
    /// checking it against the recorded checksum.
    pub fn restore_local(&self, filename: &str, content: &[u8]) -> Result<BackupRecord> {
        let meta = self
            .read_meta(filename)?
            .ok_or_else(|| AppError::NotFound(filename.to_string()))?;

        let actual = sha256_hex(content);
        if actual != meta.sha256 {
            return Err(AppError::Integrity {
                filename: filename.to_string(),
                expected: meta.sha256,
                actual,
            });
        }

        atomic_write(&self.archive_path(filename), content)?;
        info!("✓ Local copy of {} restored ({} bytes)", filename, content.len());
        Ok(meta.into_record(true))
    }

    fn archive_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    fn meta_path(&self, filename: &str) -> PathBuf {
        self.dir.join(format!("{filename}{META_SUFFIX}"))
    }

    fn write_meta(&self, meta: &ArchiveMetadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta)?;
        atomic_write(&self.meta_path(&meta.filename), &json)?;
        Ok(())
    }

    fn read_meta(&self, filename: &str) -> Result<Option<ArchiveMetadata>> {
        if !is_valid_filename(filename) {
            return Ok(None);
        }
        let content = match fs::read(self.meta_path(filename)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }
}

/// `createdAt` descending, ties broken by filename descending so the order is total.
pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.filename.cmp(&a.filename))
    });
}

fn synthesized_record(filename: String, metadata: &fs::Metadata) -> BackupRecord {
    BackupRecord {
        display_name: filename.clone(),
        filename,
        created_at: metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default(),
        size_bytes: Some(metadata.len()),
        local_present: true,
        remote_present: RemotePresence::NotApplicable,
        sha256: None,
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
