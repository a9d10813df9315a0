//! Verification of a directory against a manifest document
//!
//! [`Verifier`] rehashes every file a decoded [`ManifestDocument`] records and
//! compares the result with the recorded digest.
//!
//! ## Overview
//!
//! Verification happens in two stages:
//!
//! 1. **Preconditions**: every file entry must carry a digest and the target
//!    root must resolve to a directory. Failing either is an error and nothing
//!    is hashed.
//! 2. **Comparison**: files are visited depth-first in name order and each
//!    discrepancy is yielded as a [`Mismatch`]. Discrepancies never abort the
//!    walk. Targets are classified with `lstat` before they are opened, so a
//!    symbolic link, FIFO or directory in place of a file is reported as
//!    unreadable rather than followed or read.
//!
//! The per-file stage is lazy. [`Verification`] is an iterator, so a caller can
//! stop after the first mismatch without hashing the rest of the tree.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use treeseal::manifest::{read_document, DecodeOptions};
//! use treeseal::verification::Verifier;
//! use treeseal::hashing::DEFAULT_BUFFER_SIZE;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let document = read_document(Path::new("photos.json"), DecodeOptions::for_verification())?;
//! let mut verifier = Verifier::new(DEFAULT_BUFFER_SIZE)?;
//!
//! for mismatch in verifier.verify(&document, Path::new("/mnt/backup/photos"))? {
//!     println!("{}", mismatch);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! Only files listed in the manifest are checked. Files that exist on disk but
//! not in the manifest are not reported.

use crate::error::{Result, TreesealError};
use crate::hashing::{HashStream, DEFAULT_BUFFER_SIZE};
use crate::manifest::{files_without_digest, ManifestDocument};
use crate::types::{Entry, FileEntry, Mismatch, MismatchKind};
use crate::utils::{self, NodeType};
use std::collections::btree_map::Values;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Rehashes files and compares them with a manifest
///
/// Owns one [`HashStream`] whose buffer is reused for every file of every
/// verification run.
#[derive(Debug)]
pub struct Verifier {
    stream: HashStream,
}

impl Verifier {
    /// Create a verifier reading files in chunks of `buffer_size` bytes
    pub fn new(buffer_size: usize) -> Result<Self> {
        Ok(Self {
            stream: HashStream::new(buffer_size)?,
        })
    }

    /// Start verifying `target_root` against `document`
    ///
    /// # Errors
    ///
    /// - [`TreesealError::Format`] if any file entry lacks a digest
    /// - [`TreesealError::PathIo`] or [`TreesealError::NotADirectory`] if the
    ///   target root cannot be resolved to a directory
    pub fn verify<'a>(
        &'a mut self,
        document: &'a ManifestDocument,
        target_root: &Path,
    ) -> Result<Verification<'a>> {
        let manifest = document.manifest();

        let undigested = files_without_digest(manifest);
        if let Some(first) = undigested.first() {
            return Err(TreesealError::format(format!(
                "{} file entries have no hash, first: {}",
                undigested.len(),
                first.display()
            )));
        }

        let root = utils::canonicalize_dir(target_root)?;
        debug!(
            "Verifying {} files against {:?} (document {}, {} byte buffer)",
            manifest.total_files,
            root,
            document.self_digest(),
            self.stream.buffer_size()
        );

        Ok(Verification {
            stream: &mut self.stream,
            root,
            stack: vec![(PathBuf::new(), manifest.root.values())],
            files_checked: 0,
            started: Instant::now(),
        })
    }

    /// Verify every file and collect the findings into a report
    pub fn verify_all(
        &mut self,
        document: &ManifestDocument,
        target_root: &Path,
    ) -> Result<VerificationReport> {
        Ok(self.verify(document, target_root)?.finish())
    }
}

/// Verify `target_root` against `document` with the default buffer size
pub fn verify(document: &ManifestDocument, target_root: &Path) -> Result<VerificationReport> {
    Verifier::new(DEFAULT_BUFFER_SIZE)?.verify_all(document, target_root)
}

/// A verification run in progress
///
/// Yields one [`Mismatch`] per file whose current state differs from the
/// manifest. Files are hashed only as the iterator is advanced.
pub struct Verification<'a> {
    stream: &'a mut HashStream,
    root: PathBuf,
    stack: Vec<(PathBuf, Values<'a, String, Entry>)>,
    files_checked: usize,
    started: Instant,
}

impl<'a> Verification<'a> {
    /// Canonical target root being verified
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files hashed so far
    pub fn files_checked(&self) -> usize {
        self.files_checked
    }

    /// Run the remaining checks and summarize them
    ///
    /// Mismatches already taken from the iterator are not part of the report.
    pub fn finish(mut self) -> VerificationReport {
        let mismatches: Vec<Mismatch> = self.by_ref().collect();
        let report = VerificationReport {
            files_checked: self.files_checked,
            mismatches,
            verification_time_ms: self.started.elapsed().as_millis() as u64,
        };
        info!("{}", report.summary());
        report
    }

    fn check(&mut self, relative: PathBuf, file: &FileEntry) -> Option<Mismatch> {
        // Digests were checked for presence before the walk started
        let expected = file.digest.as_ref()?;
        self.files_checked += 1;

        let target = self.root.join(&relative);
        // Only regular files are opened; a FIFO would block the read
        let outcome = utils::get_file_metadata(&target).and_then(|metadata| {
            if metadata.node_type == NodeType::File {
                self.stream
                    .digest_file(&target, expected.algorithm())
                    .map(Some)
            } else {
                trace!("{:?} is a {:?}", target, metadata.node_type);
                Ok(None)
            }
        });

        let kind = match outcome {
            Ok(Some(actual)) if actual == *expected => return None,
            Ok(Some(actual)) => MismatchKind::DigestDiffers { actual },
            Ok(None) => MismatchKind::Unreadable {
                reason: "not a regular file".to_string(),
            },
            Err(e) => failure_kind(e),
        };

        let mismatch = Mismatch {
            path: relative,
            expected: *expected,
            kind,
        };
        warn!("{}", mismatch);
        Some(mismatch)
    }
}

impl Iterator for Verification<'_> {
    type Item = Mismatch;

    fn next(&mut self) -> Option<Mismatch> {
        loop {
            let (dir, entries) = self.stack.last_mut()?;
            match entries.next() {
                None => {
                    self.stack.pop();
                }
                Some(Entry::Directory(sub)) => {
                    let path = dir.join(&sub.name);
                    self.stack.push((path, sub.children.values()));
                }
                Some(Entry::File(file)) => {
                    let path = dir.join(&file.name);
                    if let Some(mismatch) = self.check(path, file) {
                        return Some(mismatch);
                    }
                }
            }
        }
    }
}

fn failure_kind(error: TreesealError) -> MismatchKind {
    match error {
        TreesealError::PathIo { source, .. } if source.kind() == io::ErrorKind::NotFound => {
            MismatchKind::Missing
        }
        TreesealError::PathIo { source, .. } => MismatchKind::Unreadable {
            reason: source.to_string(),
        },
        other => MismatchKind::Unreadable {
            reason: other.to_string(),
        },
    }
}

/// Outcome of a complete verification run
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Number of files hashed
    pub files_checked: usize,
    /// Every discrepancy found, in traversal order
    pub mismatches: Vec<Mismatch>,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// True when every file matched its recorded digest
    pub fn is_valid(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Mismatches whose file is gone from the target root
    pub fn missing(&self) -> impl Iterator<Item = &Mismatch> {
        self.mismatches
            .iter()
            .filter(|m| matches!(m.kind, MismatchKind::Missing))
    }

    /// One-line summary of the run
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "All {} files verified in {}ms",
                self.files_checked, self.verification_time_ms
            )
        } else {
            format!(
                "{} of {} files failed verification ({}ms)",
                self.mismatches.len(),
                self.files_checked,
                self.verification_time_ms
            )
        }
    }
}
