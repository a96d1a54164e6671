// nvrbackup/src/restore/verification.rs
use std::path::Component;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::store::BackupRecord;
use crate::utils::sha256_hex;

/// Checks the archive against the checksum recorded when it was created.
/// Archives without a recorded checksum (hand-placed ones) pass.
pub fn verify_checksum(record: &BackupRecord, archive: &[u8]) -> Result<()> {
    let Some(expected) = &record.sha256 else {
        return Ok(());
    };
    let actual = sha256_hex(archive);
    if &actual != expected {
        return Err(AppError::Integrity {
            filename: record.filename.clone(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}

/// Walks every entry of a tar.gz archive without extracting it.
///
/// Rejects unreadable archives, empty archives and entries that would land
/// outside the extraction directory. Returns the number of entries.
pub fn verify_archive(archive: &[u8]) -> Result<usize> {
    let gz_decoder = flate2::read::GzDecoder::new(archive);
    let mut reader = tar::Archive::new(gz_decoder);

    let entries = reader
        .entries()
        .map_err(|e| AppError::ApplyFailure(format!("archive is not a readable tar.gz: {e}")))?;

    let mut count = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| AppError::ApplyFailure(format!("archive is corrupt: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| AppError::ApplyFailure(format!("archive entry has an invalid path: {e}")))?;

        let unsafe_component = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if unsafe_component {
            return Err(AppError::ApplyFailure(format!(
                "archive entry escapes the target directory: {}",
                path.display()
            )));
        }
        count += 1;
    }

    if count == 0 {
        return Err(AppError::ApplyFailure("archive contains no entries".to_string()));
    }

    info!("✓ Archive verified ({} entries)", count);
    Ok(count)
}
