//! Error types for the treeseal library
//!
//! Errors fall into two classes. IO errors cover anything the filesystem
//! refuses: unresolvable roots, paths that are not directories, unreadable
//! files. Format errors cover malformed or tampered manifest documents.
//! Both abort the operation in progress; neither is retried.
//!
//! Digest mismatches found while verifying a directory are *not* errors. They
//! are reported as [`Mismatch`](crate::types::Mismatch) values.

use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the treeseal library
pub type Result<T> = std::result::Result<T, TreesealError>;

/// Main error type for all treeseal operations
#[derive(Debug, Error)]
pub enum TreesealError {
    /// I/O errors without a more specific path attached
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error while operating on a specific path
    #[error("IO error at {path:?}: {source}")]
    PathIo {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A directory was required but the path resolved to something else
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    /// Entry name cannot be represented in the document format
    #[error("Path conversion error: {0:?}")]
    PathConversion(OsString),

    /// JSON payload could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally invalid manifest document
    #[error("Invalid manifest document: {0}")]
    Format(String),

    /// The embedded self digest does not match the document contents
    #[error("Self digest mismatch - expected: {expected}, actual: {actual}")]
    SelfDigestMismatch {
        /// Digest embedded in the document
        expected: String,
        /// Digest computed over the zero-filled document
        actual: String,
    },

    /// Directory nesting beyond what a manifest document can carry
    #[error("Directory nesting exceeds {limit} levels at {path:?}")]
    TooDeep {
        /// First directory past the limit
        path: PathBuf,
        /// Deepest nesting allowed
        limit: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl TreesealError {
    /// Create a format error with a custom message
    pub fn format(msg: impl Into<String>) -> Self {
        TreesealError::Format(msg.into())
    }

    /// Attach a path to an I/O error
    pub fn path_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TreesealError::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Check if this error belongs to the IO class
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            TreesealError::Io(_)
                | TreesealError::PathIo { .. }
                | TreesealError::NotADirectory(_)
                | TreesealError::PathConversion(_)
        )
    }

    /// Check if this error indicates a malformed or tampered document
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            TreesealError::Format(_)
                | TreesealError::Json(_)
                | TreesealError::SelfDigestMismatch { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            TreesealError::NotADirectory(path) => {
                format!("{:?} is not a directory. Point treeseal at a directory root.", path)
            }
            TreesealError::SelfDigestMismatch { .. } => {
                format!(
                    "{}. The manifest document was modified or corrupted after it was written.",
                    self
                )
            }
            TreesealError::PathConversion(name) => {
                format!(
                    "Entry name {:?} is not valid UTF-8 and cannot be stored in a manifest.",
                    name
                )
            }
            TreesealError::TooDeep { limit, .. } => {
                format!(
                    "{}. Scan a subdirectory so no path is nested more than {} levels.",
                    self, limit
                )
            }
            _ => self.to_string(),
        }
    }
}
