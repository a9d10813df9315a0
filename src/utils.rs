//! Utility functions for treeseal
//!
//! Filesystem helpers shared by the walker, the verifier and the CLI:
//!
//! - Metadata extraction without following symbolic links
//! - Cross-platform permission bits
//! - Canonical directory resolution
//! - Atomic output writes
//! - Human-readable byte formatting
//!
//! All functions are thread-safe.

use crate::error::{Result, TreesealError};
use crate::types::MAX_PERMISSIONS;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::trace;

/// What kind of filesystem object a path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// FIFO, socket, device or anything else
    Other,
}

/// Metadata of one filesystem node
///
/// # Fields
///
/// * `node_type` - Classification from `lstat`
/// * `size` - Size in bytes (0 for directories on most platforms)
/// * `permissions` - Permission bits masked to `0o777`
/// * `modified_ms` - Modification time in epoch milliseconds, clamped at 0
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Classification of the node
    pub node_type: NodeType,
    /// Size in bytes
    pub size: u64,
    /// Unix-style permission bits (e.g. 0o644)
    pub permissions: u32,
    /// Last modification time in epoch milliseconds
    pub modified_ms: u64,
}

/// Get metadata for a path without following symbolic links
///
/// # Errors
///
/// - [`TreesealError::PathIo`] if the path cannot be stat'ed
pub fn get_file_metadata(path: &Path) -> Result<FileMetadata> {
    let metadata = fs::symlink_metadata(path).map_err(|e| TreesealError::path_io(path, e))?;
    let file_type = metadata.file_type();

    let node_type = if file_type.is_symlink() {
        NodeType::Symlink
    } else if file_type.is_file() {
        NodeType::File
    } else if file_type.is_dir() {
        NodeType::Directory
    } else {
        NodeType::Other
    };

    let modified = metadata
        .modified()
        .map_err(|e| TreesealError::path_io(path, e))?;

    Ok(FileMetadata {
        node_type,
        size: metadata.len(),
        permissions: get_permissions(&metadata) & MAX_PERMISSIONS,
        modified_ms: system_time_to_millis(modified),
    })
}

/// Convert a timestamp to epoch milliseconds
///
/// Times before the epoch map to 0.
pub fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Get Unix permissions from metadata
#[cfg(unix)]
fn get_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

/// Get permissions from metadata (Windows implementation)
#[cfg(windows)]
fn get_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::windows::fs::MetadataExt;

    let attrs = metadata.file_attributes();
    let mut mode = 0o644;

    // FILE_ATTRIBUTE_READONLY
    if attrs & 0x01 != 0 {
        mode = 0o444;
    }

    if metadata.is_dir() {
        mode |= 0o111;
    }

    mode
}

/// Resolve a path to its canonical absolute form and require a directory
///
/// # Errors
///
/// - [`TreesealError::PathIo`] if the path cannot be resolved
/// - [`TreesealError::NotADirectory`] if it resolves to anything else
pub fn canonicalize_dir(path: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(path).map_err(|e| TreesealError::path_io(path, e))?;
    let metadata = fs::metadata(&canonical).map_err(|e| TreesealError::path_io(&canonical, e))?;
    if !metadata.is_dir() {
        return Err(TreesealError::NotADirectory(canonical));
    }
    trace!("Resolved {:?} to {:?}", path, canonical);
    Ok(canonical)
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file lives next to the target so the final rename never
/// crosses filesystems. Readers see either the old file or the complete new
/// one.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| TreesealError::path_io(dir, e))?;
    temp.write_all(content)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| TreesealError::path_io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| TreesealError::path_io(path, e.error))?;

    trace!("Wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based).
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
