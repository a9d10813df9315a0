//! # Treeseal - Self-authenticating directory manifests
//!
//! Record the state of a directory tree in a tamper-evident document and
//! check a copy of that tree against it later.
//!
//! ## Overview
//!
//! Treeseal works in three steps:
//! - **Scan** a directory into a [`Manifest`]: names, sizes, modification
//!   times, permissions and optionally a content digest per file
//! - **Seal** the manifest into a JSON document whose first element is a
//!   SHA-1 digest of the document itself, so any edit to the file is detected
//! - **Verify** a directory (the original or a backup copy) against a sealed
//!   document and report every file whose content no longer matches
//!
//! ## Architecture
//!
//! - **Hashing**: SHA-1, xxHash64 and xxHash32 behind one [`Hasher`](hashing::Hasher)
//!   seam. Files are streamed through a reusable buffer, never loaded whole.
//!   The algorithm of a recorded digest is implied by its hex length.
//! - **Walker**: lstat-based traversal that skips symbolic links and, on
//!   request, hidden entries. File hashing can run on a rayon pool.
//! - **Codec**: the self digest is computed with a zero-filled placeholder in
//!   its slot and patched in afterwards. Decoding reverses this before parsing.
//! - **Verifier**: a lazy iterator of [`Mismatch`] values. Missing and
//!   unreadable files are findings, not errors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use treeseal::{ManifestCodec, ScanOptions, TreeWalker, Verifier};
//! use treeseal::hashing::DEFAULT_BUFFER_SIZE;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ScanOptions::default()
//!     .with_recursive(true)
//!     .with_compute_digests(true);
//! let manifest = TreeWalker::new(options).scan(Path::new("./photos"))?;
//! let document = ManifestCodec::encode(&manifest)?;
//! std::fs::write("photos.json", &document)?;
//!
//! // Later, against a backup copy
//! let sealed = ManifestCodec::decode(&std::fs::read("photos.json")?)?;
//! let report = Verifier::new(DEFAULT_BUFFER_SIZE)?
//!     .verify_all(&sealed, Path::new("/mnt/backup/photos"))?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Document Format
//!
//! ```text
//! ["<sha1 of document>",{"total_files":N,"total_size":S,"files_list":{
//!     "a.txt":{"type":0,"mtime":1700000000000,"size":8,"perms":420,"hash":"..."},
//!     "sub":{"type":1,"perms":493,"list":{...}}}}]
//! ```
//!
//! Documents are compact JSON with children in name order, so the same tree
//! always produces the same bytes.

// Public API modules
pub mod error;
pub mod hashing;
pub mod manifest;
pub mod types;
pub mod utils;
pub mod verification;
pub mod walker;

// Re-export main types for convenience
pub use error::{Result, TreesealError};
pub use hashing::{Digest, HashAlgorithm, HashStream};
pub use manifest::{DecodeOptions, ManifestCodec, ManifestDocument};
pub use types::*;
pub use verification::{Verification, VerificationReport, Verifier};
pub use walker::TreeWalker;
