//! File operations for the profile directory
//!
//! ```text
//! profiles/
//! ├── active ──► default.json      (relative symlink)
//! ├── default.json
//! └── racing.json
//! ```
//!
//! Documents are written to a hidden temp file and renamed into place, and the
//! `active` link is replaced the same way, so a reader or a crash never sees a
//! half-written document or a missing pointer.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs as async_fs;
use tracing::debug;

pub const PROFILE_EXTENSION: &str = "json";
pub const ACTIVE_LINK: &str = "active";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn profile_file_name(name: &str) -> String {
    format!("{}.{}", name, PROFILE_EXTENSION)
}

pub fn profile_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(profile_file_name(name))
}

/// Profile name for a `<name>.json` path; `None` for anything else.
pub fn profile_name(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXTENSION) {
        return None;
    }
    let stem = path.file_stem().and_then(|s| s.to_str())?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

/// Unique hidden sibling path used as the source of an atomic rename
fn temp_sibling(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("file");
    path.with_file_name(format!(".{}.{}.{}.tmp", file_name, std::process::id(), n))
}

pub async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = temp_sibling(path);
    debug!("Writing {} via {}", path.display(), temp_path.display());

    if let Err(e) = async_fs::write(&temp_path, content).await {
        let _ = async_fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = async_fs::rename(&temp_path, path).await {
        let _ = async_fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Points `link` at `target` (a file name relative to the link's directory)
/// by creating a fresh symlink and renaming it over the old one.
pub async fn swap_link(link: &Path, target: &str) -> io::Result<()> {
    let temp_path = temp_sibling(link);

    async_fs::symlink(target, &temp_path).await?;
    if let Err(e) = async_fs::rename(&temp_path, link).await {
        let _ = async_fs::remove_file(&temp_path).await;
        return Err(e);
    }
    debug!("{} -> {}", link.display(), target);
    Ok(())
}

/// Profile name the `active` link points at.
pub async fn read_link_target(link: &Path) -> io::Result<String> {
    let target = async_fs::read_link(link).await?;
    profile_name(&target).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} does not point at a profile: {}", link.display(), target.display()),
        )
    })
}

pub async fn link_exists(link: &Path) -> io::Result<bool> {
    match async_fs::symlink_metadata(link).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Profile names in `dir`, sorted.
pub async fn list_profile_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = async_fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = profile_name(&path) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
