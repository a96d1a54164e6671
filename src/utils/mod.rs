// nvrbackup/src/utils/mod.rs
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

/// Prefix used for in-flight temp files. Anything carrying it is never listed.
pub const TEMP_PREFIX: &str = ".tmp-";

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("filename pattern is a valid regex")
    })
}

/// True if `name` is a bare file name that can safely be joined onto the backup directory.
pub fn is_valid_filename(name: &str) -> bool {
    name.len() <= 255 && !name.contains("..") && filename_pattern().is_match(name)
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Writes `content` to `dest` so that readers only ever observe the old file or the
/// complete new one: temp file in the same directory, fsync, then rename.
pub fn atomic_write(dest: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = dest.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Destination has no parent directory: {}", dest.display()),
        )
    })?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(std::io::Error::from)?;

    sync_dir(dir);
    Ok(())
}

/// Like [`atomic_write`] but restricts the file to its owner.
pub fn atomic_write_private(dest: &Path, content: &[u8]) -> std::io::Result<()> {
    atomic_write(dest, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Best effort: makes the rename itself durable.
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
