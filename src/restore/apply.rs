// nvrbackup/src/restore/apply.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::archive::extract_tar_gz;
use crate::errors::{AppError, Result};

/// Makes an archive the live configuration. Must be all-or-nothing.
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    async fn apply(&self, archive: &[u8]) -> Result<()>;
}

/// Replaces a configuration directory wholesale: extract into a sibling staging
/// directory, then swap it in with two renames.
#[derive(Debug, Clone)]
pub struct DirectoryApplier {
    target: PathBuf,
}

impl DirectoryApplier {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }

    /// Repairs the state a crash between the two swap renames leaves behind:
    /// live directory missing, previous directory still parked next to it.
    /// Also clears stale staging directories. Returns true if the live
    /// directory was put back.
    pub fn recover(&self) -> Result<bool> {
        let (parent, name) = split_target(&self.target)?;
        if !parent.is_dir() {
            return Ok(false);
        }
        let previous_prefix = format!(".{name}.previous-");
        let staging_prefix = format!(".{name}.restore-");

        let mut parked: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with(&staging_prefix) {
                warn!("Removing stale staging directory {}", entry.path().display());
                let _ = fs::remove_dir_all(entry.path());
            } else if file_name.starts_with(&previous_prefix) {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH);
                parked.push((modified, entry.path()));
            }
        }
        parked.sort();

        if self.target.exists() {
            for (_, path) in parked {
                let _ = fs::remove_dir_all(path);
            }
            return Ok(false);
        }

        match parked.pop() {
            Some((_, newest)) => {
                fs::rename(&newest, &self.target)?;
                warn!(
                    "⚠ Interrupted restore detected, put {} back in place",
                    self.target.display()
                );
                for (_, path) in parked {
                    let _ = fs::remove_dir_all(path);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ConfigApplier for DirectoryApplier {
    async fn apply(&self, archive: &[u8]) -> Result<()> {
        let target = self.target.clone();
        let archive = archive.to_vec();
        tokio::task::spawn_blocking(move || swap_in(&target, &archive))
            .await
            .map_err(|e| AppError::ApplyFailure(format!("apply task failed: {e}")))?
    }
}

fn split_target(target: &Path) -> Result<(&Path, String)> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(OsString::from)
        .ok_or_else(|| AppError::Config(format!("Invalid restore target: {}", target.display())))?;
    Ok((parent, name.to_string_lossy().to_string()))
}

fn swap_in(target: &Path, archive: &[u8]) -> Result<()> {
    let (parent, name) = split_target(target)?;
    fs::create_dir_all(parent)
        .map_err(|e| AppError::ApplyFailure(format!("cannot prepare {}: {e}", parent.display())))?;

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{name}.restore-"))
        .tempdir_in(parent)
        .map_err(|e| AppError::ApplyFailure(format!("cannot create staging directory: {e}")))?;

    // Nothing live has been touched up to here.
    extract_tar_gz(archive, staging.path())
        .map_err(|e| AppError::ApplyFailure(format!("extraction failed: {e}")))?;

    if target.exists() {
        let previous = parent.join(format!(".{name}.previous-{}", Uuid::new_v4().simple()));
        fs::rename(target, &previous)
            .map_err(|e| AppError::ApplyFailure(format!("cannot move live configuration aside: {e}")))?;

        if let Err(e) = fs::rename(staging.path(), target) {
            if let Err(rollback) = fs::rename(&previous, target) {
                warn!(
                    "⚠ Rollback failed, previous configuration left at {}: {}",
                    previous.display(),
                    rollback
                );
            }
            return Err(AppError::ApplyFailure(format!("cannot swap in restored configuration: {e}")));
        }

        if let Err(e) = fs::remove_dir_all(&previous) {
            warn!("⚠ Could not remove previous configuration {}: {}", previous.display(), e);
        }
    } else {
        fs::rename(staging.path(), target)
            .map_err(|e| AppError::ApplyFailure(format!("cannot move restored configuration into place: {e}")))?;
    }

    // `staging` now points at a path that no longer exists; dropping it is a no-op.
    info!("✓ Configuration at {} replaced", target.display());
    Ok(())
}
