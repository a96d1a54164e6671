// nvrbackup/src/backup/archive.rs
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::info;
use walkdir::WalkDir;

use crate::errors::{AppError, Result};

/// Produces the opaque configuration snapshot that gets backed up.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<u8>>;
}

/// Snapshots a directory as a gzipped tar held in memory.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    source_dir: PathBuf,
}

impl DirectorySnapshot {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }
}

#[async_trait]
impl SnapshotSource for DirectorySnapshot {
    async fn snapshot(&self) -> Result<Vec<u8>> {
        let source_dir = self.source_dir.clone();
        tokio::task::spawn_blocking(move || create_tar_gz(&source_dir))
            .await
            .map_err(|e| AppError::TaskFailed(format!("snapshot: {e}")))?
    }
}

/// Creates a GZipped TAR archive of everything under `source_dir`.
///
/// Paths inside the archive are relative to `source_dir`. Symlinks are skipped.
pub fn create_tar_gz(source_dir: &Path) -> Result<Vec<u8>> {
    if !source_dir.is_dir() {
        return Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Source for archival is not a directory: {}", source_dir.display()),
        )));
    }

    info!("Creating tar.gz snapshot of {}", source_dir.display());

    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar_builder = Builder::new(enc);
    tar_builder.follow_symlinks(false);

    let mut files = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            AppError::Io(std::io::Error::other(format!(
                "Failed to walk directory {}: {}",
                source_dir.display(),
                e
            )))
        })?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).map_err(|e| {
            AppError::Io(std::io::Error::other(format!(
                "Failed to strip prefix {} from {}: {}",
                source_dir.display(),
                path.display(),
                e
            )))
        })?;

        if name.as_os_str().is_empty() {
            // Skip the root directory itself
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            tar_builder.append_dir(name, path)?;
        } else if file_type.is_file() {
            tar_builder.append_path_with_name(path, name)?;
            files += 1;
        }
    }

    let encoder = tar_builder.into_inner()?;
    let bytes = encoder.finish()?;

    info!("✓ Snapshot holds {} files ({} bytes compressed)", files, bytes.len());
    Ok(bytes)
}

/// Extracts a GZipped TAR archive held in memory into `extract_to_dir`.
pub fn extract_tar_gz(archive: &[u8], extract_to_dir: &Path) -> Result<()> {
    if !extract_to_dir.exists() {
        fs::create_dir_all(extract_to_dir)?;
    } else if !extract_to_dir.is_dir() {
        return Err(AppError::Io(std::io::Error::other(format!(
            "Extraction path exists but is not a directory: {}",
            extract_to_dir.display()
        ))));
    }

    let gz_decoder = flate2::read::GzDecoder::new(archive);
    let mut unpacker = tar::Archive::new(gz_decoder);
    unpacker.set_preserve_permissions(true);
    unpacker.unpack(extract_to_dir)?;

    info!("✓ Archive extracted to {}", extract_to_dir.display());
    Ok(())
}
