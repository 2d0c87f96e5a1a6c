//! Atomic filesystem primitives for warden hooks.
//!
//! Hook processes from concurrent sessions can touch the same snapshot and
//! index files at any moment. Every shared write goes through one of three
//! primitives:
//!
//! - [`atomic_write`]: temp file in the same directory, then rename. A
//!   reader sees either the old content or the new content, never a torn file.
//! - [`append_with_lock`]: append under an exclusive advisory lock.
//! - [`with_exclusive_lock`]: read-modify-write critical section guarded by
//!   a dedicated `<path>.lock` file, so a crash mid-rewrite leaves the data
//!   file either pre- or post-RMW.
//!
//! # Example
//!
//! ```
//! use warden_fs::{atomic_write, read_opt};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("latest.md");
//! atomic_write(&path, b"snapshot").unwrap();
//! assert_eq!(read_opt(&path).as_deref(), Some("snapshot"));
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

/// Write `bytes` to `path` atomically via temp-file-and-rename.
///
/// The temp file lives in the same directory as the target so the rename
/// stays on one filesystem. On failure the temp file is removed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }

    let tmp_path = tmp_sibling(path);
    let write_result = fs::write(&tmp_path, bytes)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))
        .and_then(|_| {
            fs::rename(&tmp_path, path)
                .with_context(|| format!("failed to rename into {}", path.display()))
        });

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    write_result
}

/// Append `bytes` to `path` while holding an exclusive advisory lock on the
/// file itself. Creates the file (and parent dirs) if absent.
pub fn append_with_lock(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;

    file.lock_exclusive()
        .with_context(|| format!("failed to lock {}", path.display()))?;
    let result = file
        .write_all(bytes)
        .with_context(|| format!("failed to append to {}", path.display()));
    let _ = fs2::FileExt::unlock(&file);
    result
}

/// Run `body` while holding an exclusive lock on a dedicated `<path>.lock`
/// file next to `data_path`.
///
/// The data file itself is free to be replaced atomically inside the
/// critical section; the lock file only serializes the read-modify-write.
pub fn with_exclusive_lock<T>(data_path: &Path, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock_path = lock_sibling(data_path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }

    let lock_file = File::create(&lock_path)
        .with_context(|| format!("failed to create lock file {}", lock_path.display()))?;
    lock_file
        .lock_exclusive()
        .with_context(|| format!("failed to lock {}", lock_path.display()))?;

    let result = body();
    let _ = fs2::FileExt::unlock(&lock_file);
    result
}

/// Rewrite `path` in place under the file's own exclusive lock, keeping only
/// what `keep` returns for the current content. Used to shrink append-only
/// logs without losing concurrent appends.
pub fn rewrite_locked(path: &Path, keep: impl FnOnce(&str) -> String) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("failed to lock {}", path.display()))?;

    let result = (|| -> Result<()> {
        let content = fs::read_to_string(path).unwrap_or_default();
        let kept = keep(&content);
        file.set_len(0)
            .with_context(|| format!("failed to truncate {}", path.display()))?;
        let mut writer = &file;
        writer.seek(SeekFrom::Start(0))?;
        writer
            .write_all(kept.as_bytes())
            .with_context(|| format!("failed to rewrite {}", path.display()))?;
        Ok(())
    })();

    let _ = fs2::FileExt::unlock(&file);
    result
}

/// Read a file to a string, returning `None` on any failure.
pub fn read_opt(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// File size in bytes, 0 when the file is missing or unreadable.
pub fn size_of(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Seconds since the file was last modified. `None` when missing.
pub fn age_seconds(path: &Path) -> Option<u64> {
    let mtime = fs::metadata(path).ok()?.modified().ok()?;
    mtime.elapsed().ok().map(|d| d.as_secs())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn lock_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}
