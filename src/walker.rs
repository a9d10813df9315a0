//! Directory scanning
//!
//! [`TreeWalker`] turns a directory into a [`Manifest`]: a tree of file and
//! directory entries with their metadata and, optionally, a content digest for
//! every file.
//!
//! ## Traversal rules
//!
//! - The root and every subdirectory are canonicalized independently before
//!   they are listed.
//! - Entries are classified with `lstat`. Symbolic links, FIFOs, sockets and
//!   devices never produce an entry.
//! - Names starting with `.` are skipped unless hidden entries are requested.
//! - Without `recursive`, subdirectories are left out of the tree entirely.
//! - Children are ordered by name, so two scans of an unchanged tree produce
//!   identical manifests.
//! - Any unreadable file or directory aborts the scan. No partial manifest is
//!   returned.
//! - Directories nested deeper than [`MAX_DEPTH`] levels abort the scan.
//!
//! ## Parallel hashing
//!
//! The tree is listed first and hashed second. Totals are reduced from
//! per-directory listings, so they are known before the first byte is read.
//! With `parallel_workers > 1` all files are hashed on a dedicated rayon pool.
//! Every worker owns its own [`HashStream`] buffer and writes the digest into
//! its own entry, so the manifest is identical to a sequential scan.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treeseal::walker::TreeWalker;
//! use treeseal::types::ScanOptions;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let walker = TreeWalker::new(
//!     ScanOptions::default()
//!         .with_recursive(true)
//!         .with_compute_digests(true),
//! );
//! let manifest = walker.scan(Path::new("./photos"))?;
//! println!("{} files, {} bytes", manifest.total_files, manifest.total_size);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TreesealError};
use crate::hashing::{Digest, HashStream};
use crate::types::{
    is_hidden, DirectoryEntry, Entry, FileEntry, Manifest, ProgressInfo, ScanOptions, ScanTotals,
    MAX_DEPTH,
};
use crate::utils::{self, NodeType};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Recursive directory scanner producing manifests
#[derive(Debug, Clone)]
pub struct TreeWalker {
    options: ScanOptions,
}

impl TreeWalker {
    /// Create a walker with the given options
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Options this walker scans with
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan `root` into a manifest
    ///
    /// # Errors
    ///
    /// - [`TreesealError::PathIo`] if the root cannot be resolved, or any
    ///   entry below it cannot be listed, stat'ed or read
    /// - [`TreesealError::NotADirectory`] if the root is not a directory
    /// - [`TreesealError::PathConversion`] for names that are not UTF-8
    /// - [`TreesealError::TooDeep`] for directories nested deeper than
    ///   [`MAX_DEPTH`] levels
    /// - [`TreesealError::InvalidConfiguration`] for invalid options
    pub fn scan(&self, root: &Path) -> Result<Manifest> {
        self.scan_with_progress::<fn(ProgressInfo)>(root, None)
    }

    /// Scan `root`, reporting every hashed file to `progress_callback`
    ///
    /// The whole tree is listed before hashing starts, so every report carries
    /// the file and byte totals. The callback may be invoked from several
    /// worker threads at once.
    pub fn scan_with_progress<F>(
        &self,
        root: &Path,
        progress_callback: Option<F>,
    ) -> Result<Manifest>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        self.options.validate()?;
        let start = Instant::now();

        let root = utils::canonicalize_dir(root)?;
        debug!("Scanning {:?} with {:?}", root, self.options);

        let (entries, totals) = self.list_dir(&root, 0)?;
        let mut manifest = Manifest {
            total_files: totals.files,
            total_size: totals.bytes,
            root: entries,
        };
        debug!(
            "Listed {} files containing {}",
            manifest.total_files,
            utils::format_bytes(manifest.total_size)
        );

        if self.options.compute_digests {
            let pass = DigestPass {
                options: &self.options,
                progress: progress_callback.as_ref(),
                total_files: manifest.total_files as usize,
                total_bytes: manifest.total_size,
                files_hashed: AtomicUsize::new(0),
                bytes_hashed: AtomicU64::new(0),
            };
            pass.run(&root, &mut manifest.root)?;
        }

        info!(
            "Found {} files containing {} in {:?}",
            manifest.total_files,
            utils::format_bytes(manifest.total_size),
            start.elapsed()
        );
        Ok(manifest)
    }

    /// List one directory, returning its children and their totals
    ///
    /// `depth` counts the directories between the scan root and `path`.
    fn list_dir(&self, path: &Path, depth: usize) -> Result<(BTreeMap<String, Entry>, ScanTotals)> {
        let dir = fs::canonicalize(path).map_err(|e| TreesealError::path_io(path, e))?;

        let mut entries = BTreeMap::new();
        let mut totals = ScanTotals::default();

        for dir_entry in fs::read_dir(&dir).map_err(|e| TreesealError::path_io(&dir, e))? {
            let dir_entry = dir_entry.map_err(|e| TreesealError::path_io(&dir, e))?;
            let name = dir_entry
                .file_name()
                .into_string()
                .map_err(TreesealError::PathConversion)?;

            if is_hidden(&name) && !self.options.include_hidden {
                trace!("Skipping hidden entry {:?}", dir.join(&name));
                continue;
            }

            let child = dir.join(&name);
            let metadata = utils::get_file_metadata(&child)?;
            let entry = match metadata.node_type {
                NodeType::File => {
                    totals = totals.merge(ScanTotals::file(metadata.size));
                    Entry::File(FileEntry {
                        name: name.clone(),
                        modified_ms: metadata.modified_ms,
                        size: metadata.size,
                        permissions: metadata.permissions,
                        digest: None,
                    })
                }
                NodeType::Directory if self.options.recursive => {
                    if depth >= MAX_DEPTH {
                        return Err(TreesealError::TooDeep {
                            path: child,
                            limit: MAX_DEPTH,
                        });
                    }
                    let (children, child_totals) = self.list_dir(&child, depth + 1)?;
                    totals = totals.merge(child_totals);
                    Entry::Directory(DirectoryEntry {
                        name: name.clone(),
                        permissions: metadata.permissions,
                        children,
                    })
                }
                NodeType::Directory => {
                    trace!("Omitting directory {:?} (not recursive)", child);
                    continue;
                }
                NodeType::Symlink | NodeType::Other => {
                    trace!("Skipping {:?} ({:?})", child, metadata.node_type);
                    continue;
                }
            };
            entries.insert(name, entry);
        }

        trace!(
            "Listed {:?}: {} entries, {} files",
            dir,
            entries.len(),
            totals.files
        );
        Ok((entries, totals))
    }
}

/// Scan `root` with `options`
pub fn scan(root: &Path, options: &ScanOptions) -> Result<Manifest> {
    TreeWalker::new(options.clone()).scan(root)
}

/// Hashing state shared by every worker of one scan
struct DigestPass<'a, F> {
    options: &'a ScanOptions,
    progress: Option<&'a F>,
    total_files: usize,
    total_bytes: u64,
    files_hashed: AtomicUsize,
    bytes_hashed: AtomicU64,
}

impl<F> DigestPass<'_, F>
where
    F: Fn(ProgressInfo) + Send + Sync,
{
    /// Attach a digest to every file below `root`
    ///
    /// With more than one worker the files are hashed on a dedicated rayon
    /// pool and every worker owns its own [`HashStream`] buffer.
    fn run(&self, root: &Path, entries: &mut BTreeMap<String, Entry>) -> Result<()> {
        let mut files = Vec::with_capacity(self.total_files);
        collect_files(entries, root, &mut files);

        if self.options.parallel_workers > 1 && files.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.parallel_workers)
                .build()
                .map_err(|e| TreesealError::ThreadPool(e.to_string()))?;

            pool.install(|| {
                files.par_iter_mut().try_for_each_init(
                    || HashStream::new(self.options.buffer_size),
                    |stream, (path, file)| {
                        let stream = stream
                            .as_mut()
                            .map_err(|e| TreesealError::InvalidConfiguration(e.to_string()))?;
                        file.digest = Some(self.hash_one(stream, path)?);
                        Ok(())
                    },
                )
            })
        } else {
            let mut stream = HashStream::new(self.options.buffer_size)?;
            for (path, file) in files {
                file.digest = Some(self.hash_one(&mut stream, &path)?);
            }
            Ok(())
        }
    }

    fn hash_one(&self, stream: &mut HashStream, path: &Path) -> Result<Digest> {
        let digest = stream.digest_file_with_progress(path, self.options.digest_algorithm, |n| {
            self.bytes_hashed.fetch_add(n as u64, Ordering::Relaxed);
        })?;
        let processed = self.files_hashed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Hashed {:?} ({}/{} files): {}",
            path, processed, self.total_files, digest
        );

        if let Some(callback) = self.progress {
            callback(ProgressInfo {
                operation: "Generating hashes".to_string(),
                current_item: Some(path.display().to_string()),
                processed,
                total: Some(self.total_files),
                bytes_processed: self.bytes_hashed.load(Ordering::Relaxed),
                total_bytes: Some(self.total_bytes),
            });
        }
        Ok(digest)
    }
}

/// Absolute path and entry of every file below `dir`, depth-first
fn collect_files<'a>(
    entries: &'a mut BTreeMap<String, Entry>,
    dir: &Path,
    out: &mut Vec<(PathBuf, &'a mut FileEntry)>,
) {
    for entry in entries.values_mut() {
        match entry {
            Entry::File(file) => {
                let path = dir.join(&file.name);
                out.push((path, file));
            }
            Entry::Directory(sub) => {
                let path = dir.join(&sub.name);
                collect_files(&mut sub.children, &path, out);
            }
        }
    }
}
