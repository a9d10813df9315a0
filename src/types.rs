//! Core data types used throughout the treeseal library
//!
//! ## Overview
//!
//! - **Tree**: [`FileEntry`], [`DirectoryEntry`], [`Entry`] and the root
//!   aggregate [`Manifest`]
//! - **Configuration**: [`ScanOptions`] controls a scan pass
//! - **Findings**: [`Mismatch`] and [`MismatchKind`] describe verification
//!   discrepancies
//! - **Progress**: [`ProgressInfo`] is handed to progress callbacks
//!
//! Trees are built once by a scan and never mutated afterwards. Children are
//! kept in `BTreeMap`s so iteration and serialization order is always by name.
//!
//! ## Examples
//!
//! ```rust
//! use treeseal::types::ScanOptions;
//! use treeseal::hashing::HashAlgorithm;
//!
//! let options = ScanOptions::default()
//!     .with_recursive(true)
//!     .with_compute_digests(true)
//!     .with_digest_algorithm(HashAlgorithm::XxHash64);
//! assert!(options.validate().is_ok());
//! ```

use crate::error::{Result, TreesealError};
use crate::hashing::{Digest, HashAlgorithm, DEFAULT_BUFFER_SIZE};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Names starting with this character are hidden
pub const HIDDEN_MARKER: char = '.';

/// Highest permission value a manifest may record
pub const MAX_PERMISSIONS: u32 = 0o777;

/// Deepest directory nesting a manifest may record
pub const MAX_DEPTH: usize = 128;

/// Check whether an entry name is hidden
pub fn is_hidden(name: &str) -> bool {
    name.starts_with(HIDDEN_MARKER)
}

/// Kind tag of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

impl EntryKind {
    /// Numeric tag used in documents
    pub fn tag(self) -> u64 {
        match self {
            EntryKind::File => 0,
            EntryKind::Directory => 1,
        }
    }

    /// Inverse of [`EntryKind::tag`]
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(EntryKind::File),
            1 => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// One regular file in a manifest
///
/// # Examples
///
/// ```rust
/// # use treeseal::types::FileEntry;
/// let entry = FileEntry {
///     name: "a.txt".to_string(),
///     modified_ms: 1_700_000_000_000,
///     size: 8,
///     permissions: 0o644,
///     digest: None,
/// };
/// assert_eq!(entry.modified().timestamp(), 1_700_000_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path segment, unique within the parent
    pub name: String,
    /// Last modification time in epoch milliseconds
    pub modified_ms: u64,
    /// File size in bytes
    pub size: u64,
    /// Permission bits, `0..=0o777`
    pub permissions: u32,
    /// Content digest, present when hashing was requested
    pub digest: Option<Digest>,
}

impl FileEntry {
    /// Modification time as a UTC timestamp
    pub fn modified(&self) -> DateTime<Utc> {
        i64::try_from(self.modified_ms)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_default()
    }
}

/// One directory in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Path segment, unique within the parent
    pub name: String,
    /// Permission bits, `0..=0o777`
    pub permissions: u32,
    /// Children keyed by name
    pub children: BTreeMap<String, Entry>,
}

/// A file or directory node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Regular file
    File(FileEntry),
    /// Directory with children
    Directory(DirectoryEntry),
}

impl Entry {
    /// Name of this entry
    pub fn name(&self) -> &str {
        match self {
            Entry::File(file) => &file.name,
            Entry::Directory(dir) => &dir.name,
        }
    }

    /// Kind of this entry
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::File(_) => EntryKind::File,
            Entry::Directory(_) => EntryKind::Directory,
        }
    }

    /// Permission bits of this entry
    pub fn permissions(&self) -> u32 {
        match self {
            Entry::File(file) => file.permissions,
            Entry::Directory(dir) => dir.permissions,
        }
    }

    /// Borrow as a file entry
    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(file) => Some(file),
            Entry::Directory(_) => None,
        }
    }

    /// Borrow as a directory entry
    pub fn as_directory(&self) -> Option<&DirectoryEntry> {
        match self {
            Entry::Directory(dir) => Some(dir),
            Entry::File(_) => None,
        }
    }
}

/// File count and byte total of a (sub)tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTotals {
    /// Number of file entries
    pub files: u64,
    /// Sum of file sizes
    pub bytes: u64,
}

impl ScanTotals {
    /// Totals for a single file
    pub fn file(size: u64) -> Self {
        Self { files: 1, bytes: size }
    }

    /// Combine two totals
    pub fn merge(self, other: ScanTotals) -> Self {
        Self {
            files: self.files.saturating_add(other.files),
            bytes: self.bytes.saturating_add(other.bytes),
        }
    }

    /// Totals of every file reachable from `entries`
    pub fn of(entries: &BTreeMap<String, Entry>) -> Self {
        entries.values().fold(ScanTotals::default(), |acc, entry| match entry {
            Entry::File(file) => acc.merge(ScanTotals::file(file.size)),
            Entry::Directory(dir) => acc.merge(ScanTotals::of(&dir.children)),
        })
    }
}

/// Root aggregate produced by a scan
///
/// `total_files` and `total_size` always describe the file entries reachable
/// from `root`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    /// Count of all file entries in the tree
    pub total_files: u64,
    /// Sum of all file sizes in the tree
    pub total_size: u64,
    /// Top-level children of the scanned root
    pub root: BTreeMap<String, Entry>,
}

impl Manifest {
    /// Build a manifest, deriving the totals from the tree
    pub fn from_entries(root: BTreeMap<String, Entry>) -> Self {
        let totals = ScanTotals::of(&root);
        Self {
            total_files: totals.files,
            total_size: totals.bytes,
            root,
        }
    }

    /// Totals recomputed from the tree
    pub fn computed_totals(&self) -> ScanTotals {
        ScanTotals::of(&self.root)
    }

    /// Check that the recorded totals match the tree
    pub fn is_consistent(&self) -> bool {
        let totals = self.computed_totals();
        totals.files == self.total_files && totals.bytes == self.total_size
    }

    /// Number of directory entries in the tree
    pub fn directory_count(&self) -> usize {
        fn count(entries: &BTreeMap<String, Entry>) -> usize {
            entries
                .values()
                .filter_map(Entry::as_directory)
                .map(|dir| 1 + count(&dir.children))
                .sum()
        }
        count(&self.root)
    }

    /// Look up an entry by relative path
    pub fn get(&self, path: &Path) -> Option<&Entry> {
        let mut components = path.iter();
        let mut entry = self.root.get(components.next()?.to_str()?)?;
        for component in components {
            entry = entry.as_directory()?.children.get(component.to_str()?)?;
        }
        Some(entry)
    }

    /// All file entries with their paths relative to the root, depth first
    pub fn files(&self) -> Vec<(PathBuf, &FileEntry)> {
        fn collect<'a>(
            prefix: &Path,
            entries: &'a BTreeMap<String, Entry>,
            out: &mut Vec<(PathBuf, &'a FileEntry)>,
        ) {
            for (name, entry) in entries {
                let path = prefix.join(name);
                match entry {
                    Entry::File(file) => out.push((path, file)),
                    Entry::Directory(dir) => collect(&path, &dir.children, out),
                }
            }
        }

        let mut out = Vec::with_capacity(self.total_files as usize);
        collect(Path::new(""), &self.root, &mut out);
        out
    }
}

/// Options controlling a scan pass
///
/// Defaults mirror the command-line tool: not recursive, hidden entries
/// excluded, no digests, SHA-1 when digests are requested, 32 MiB buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Descend into subdirectories; when false they are omitted entirely
    pub recursive: bool,
    /// Include entries whose names start with `.`
    pub include_hidden: bool,
    /// Hash every file's contents
    pub compute_digests: bool,
    /// Algorithm used when `compute_digests` is set
    pub digest_algorithm: HashAlgorithm,
    /// Read buffer size for hashing, in bytes
    pub buffer_size: usize,
    /// Worker threads used for hashing (1 = sequential)
    pub parallel_workers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            include_hidden: false,
            compute_digests: false,
            digest_algorithm: HashAlgorithm::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            parallel_workers: num_cpus::get(),
        }
    }
}

impl ScanOptions {
    /// Set recursion
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set hidden entry inclusion
    pub fn with_include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    /// Enable or disable content hashing
    pub fn with_compute_digests(mut self, compute_digests: bool) -> Self {
        self.compute_digests = compute_digests;
        self
    }

    /// Set the per-file digest algorithm
    pub fn with_digest_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set the read buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the number of hashing workers (minimum 1)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Reject option combinations a scan cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(TreesealError::InvalidConfiguration(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.parallel_workers == 0 {
            return Err(TreesealError::InvalidConfiguration(
                "parallel_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Information passed to progress callbacks
///
/// Totals are filled in once the tree has been listed, before the first file
/// is hashed.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// File that was just hashed
    pub current_item: Option<String>,
    /// Files hashed so far
    pub processed: usize,
    /// Files to hash (if known)
    pub total: Option<usize>,
    /// Bytes hashed so far
    pub bytes_processed: u64,
    /// Bytes to hash (if known)
    pub total_bytes: Option<u64>,
}

impl ProgressInfo {
    /// Progress as a percentage (0-100)
    ///
    /// Measured in bytes, or in files when every file is empty.
    pub fn percentage(&self) -> Option<f32> {
        match (self.total_bytes, self.total) {
            (Some(bytes), _) if bytes > 0 => {
                Some(self.bytes_processed.min(bytes) as f32 / bytes as f32 * 100.0)
            }
            (_, Some(files)) if files > 0 => {
                Some(self.processed.min(files) as f32 / files as f32 * 100.0)
            }
            _ => None,
        }
    }
}

/// Why a file failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// The file's current digest differs from the recorded one
    DigestDiffers {
        /// Digest computed from the file on disk
        actual: Digest,
    },
    /// The file no longer exists under the target root
    Missing,
    /// The file exists but could not be read
    Unreadable {
        /// Description of the I/O failure
        reason: String,
    },
}

/// A discrepancy between a manifest and the verified directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Path relative to the verified root
    pub path: PathBuf,
    /// Digest recorded in the manifest
    pub expected: Digest,
    /// What went wrong
    pub kind: MismatchKind,
}

impl Mismatch {
    /// Digest found on disk, if the file could be hashed
    pub fn actual(&self) -> Option<&Digest> {
        match &self.kind {
            MismatchKind::DigestDiffers { actual } => Some(actual),
            _ => None,
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MismatchKind::DigestDiffers { actual } => write!(
                f,
                "hash for {} invalid ({}) ({})",
                self.path.display(),
                self.expected,
                actual
            ),
            MismatchKind::Missing => write!(
                f,
                "{} missing (expected {})",
                self.path.display(),
                self.expected
            ),
            MismatchKind::Unreadable { reason } => write!(
                f,
                "{} unreadable: {} (expected {})",
                self.path.display(),
                reason,
                self.expected
            ),
        }
    }
}
