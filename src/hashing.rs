//! Streaming content hashing
//!
//! Files are hashed in fixed-size chunks through a single reusable buffer.
//! Three algorithms are supported and each produces a hex digest of a distinct
//! width, so the algorithm that produced a stored digest can always be
//! recovered from the digest's length alone:
//!
//! | Algorithm  | Hex width | Notes                               |
//! |------------|-----------|-------------------------------------|
//! | SHA-1      | 40        | default, also used for self digests |
//! | xxHash64   | 16        | seeded with `0xdeadface`            |
//! | xxHash32   | 8         | seeded with `0xdeadface`            |
//!
//! Internally a digest is always a [`Digest`] value tagged with its
//! algorithm. Hex strings only exist at the document boundary.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treeseal::hashing::{HashAlgorithm, HashStream};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut stream = HashStream::new(1024 * 1024)?;
//! let digest = stream.digest_file(Path::new("data.bin"), HashAlgorithm::XxHash64)?;
//! assert_eq!(digest.to_hex().len(), 16);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TreesealError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::trace;
use xxhash_rust::xxh32::Xxh32;
use xxhash_rust::xxh64::Xxh64;

/// Default read buffer size (32 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 0x2000000;

/// Seed shared by both xxHash variants
pub const XXHASH_SEED: u32 = 0xdeadface;

/// Content hash algorithms available for per-file digests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-1, 40 hex characters
    #[default]
    Sha1,
    /// 64-bit xxHash, 16 hex characters
    XxHash64,
    /// 32-bit xxHash, 8 hex characters
    XxHash32,
}

impl HashAlgorithm {
    /// Width of this algorithm's digest in hex characters
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::XxHash64 => 16,
            HashAlgorithm::XxHash32 => 8,
        }
    }

    /// Infer the algorithm from a hex digest width
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(HashAlgorithm::Sha1),
            16 => Some(HashAlgorithm::XxHash64),
            8 => Some(HashAlgorithm::XxHash32),
            _ => None,
        }
    }

    /// Short lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::XxHash64 => "xxhash64",
            HashAlgorithm::XxHash32 => "xxhash32",
        }
    }

    /// Create a fresh rolling hash state for this algorithm
    pub fn hasher(self) -> Box<dyn Hasher> {
        match self {
            HashAlgorithm::Sha1 => Box::new(Sha1Hasher(Sha1::new())),
            HashAlgorithm::XxHash64 => Box::new(XxHash64Hasher(Xxh64::new(XXHASH_SEED as u64))),
            HashAlgorithm::XxHash32 => Box::new(XxHash32Hasher(Xxh32::new(XXHASH_SEED))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling hash state fed chunk by chunk
pub trait Hasher: Send {
    /// Feed the next chunk of input
    fn update(&mut self, data: &[u8]);
    /// Consume the state and produce the digest
    fn finish(self: Box<Self>) -> Digest;
}

struct Sha1Hasher(Sha1);

impl Hasher for Sha1Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.0.finalize());
        Digest::Sha1(bytes)
    }
}

struct XxHash64Hasher(Xxh64);

impl Hasher for XxHash64Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        Digest::XxHash64(self.0.digest())
    }
}

struct XxHash32Hasher(Xxh32);

impl Hasher for XxHash32Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        Digest::XxHash32(self.0.digest())
    }
}

/// A content digest tagged with the algorithm that produced it
///
/// Serializes as a lowercase, zero-padded hex string whose width identifies
/// the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digest {
    /// SHA-1 output
    Sha1([u8; 20]),
    /// xxHash64 output
    XxHash64(u64),
    /// xxHash32 output
    XxHash32(u32),
}

impl Digest {
    /// Algorithm that produced this digest
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Digest::Sha1(_) => HashAlgorithm::Sha1,
            Digest::XxHash64(_) => HashAlgorithm::XxHash64,
            Digest::XxHash32(_) => HashAlgorithm::XxHash32,
        }
    }

    /// Lowercase hex form, always `algorithm().hex_len()` characters wide
    pub fn to_hex(&self) -> String {
        match self {
            Digest::Sha1(bytes) => hex::encode(bytes),
            Digest::XxHash64(value) => format!("{:016x}", value),
            Digest::XxHash32(value) => format!("{:08x}", value),
        }
    }

    /// Parse a hex digest, inferring the algorithm from its width
    ///
    /// # Errors
    ///
    /// Returns [`TreesealError::Format`] if the width is not 40, 16 or 8, or
    /// if the string contains non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let algorithm = HashAlgorithm::from_hex_len(s.len()).ok_or_else(|| {
            TreesealError::format(format!("invalid hash length {} ({})", s.len(), s))
        })?;
        let invalid = |_: hex::FromHexError| TreesealError::format(format!("invalid hash ({})", s));

        Ok(match algorithm {
            HashAlgorithm::Sha1 => {
                let mut bytes = [0u8; 20];
                hex::decode_to_slice(s, &mut bytes).map_err(invalid)?;
                Digest::Sha1(bytes)
            }
            HashAlgorithm::XxHash64 => {
                let mut bytes = [0u8; 8];
                hex::decode_to_slice(s, &mut bytes).map_err(invalid)?;
                Digest::XxHash64(u64::from_be_bytes(bytes))
            }
            HashAlgorithm::XxHash32 => {
                let mut bytes = [0u8; 4];
                hex::decode_to_slice(s, &mut bytes).map_err(invalid)?;
                Digest::XxHash32(u32::from_be_bytes(bytes))
            }
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = TreesealError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash an in-memory byte slice
pub fn digest_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Digest {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finish()
}

/// Streaming file hasher owning one reusable read buffer
///
/// A `HashStream` is not shared between threads; parallel callers give each
/// worker its own instance.
#[derive(Debug)]
pub struct HashStream {
    buffer: Vec<u8>,
}

impl HashStream {
    /// Create a stream with a read buffer of `buffer_size` bytes
    ///
    /// # Errors
    ///
    /// Returns [`TreesealError::InvalidConfiguration`] for a zero-sized buffer.
    pub fn new(buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(TreesealError::InvalidConfiguration(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            buffer: vec![0u8; buffer_size],
        })
    }

    /// Size of the read buffer in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Hash the contents of the file at `path`
    pub fn digest_file(&mut self, path: &Path, algorithm: HashAlgorithm) -> Result<Digest> {
        self.digest_file_with_progress(path, algorithm, |_| {})
    }

    /// Hash a file, reporting the byte count of every chunk read
    ///
    /// The file handle is dropped on every return path.
    pub fn digest_file_with_progress<F>(
        &mut self,
        path: &Path,
        algorithm: HashAlgorithm,
        on_chunk: F,
    ) -> Result<Digest>
    where
        F: FnMut(usize),
    {
        let file = File::open(path).map_err(|e| TreesealError::path_io(path, e))?;
        let digest = self
            .digest_reader(file, algorithm, on_chunk)
            .map_err(|e| TreesealError::path_io(path, e))?;
        trace!("Hashed {:?} with {}: {}", path, algorithm, digest);
        Ok(digest)
    }

    /// Hash everything a reader yields until it reports end of stream
    ///
    /// Only a zero-length read ends the stream. Short reads are hashed and
    /// reading continues.
    pub fn digest_reader<R, F>(
        &mut self,
        mut reader: R,
        algorithm: HashAlgorithm,
        mut on_chunk: F,
    ) -> io::Result<Digest>
    where
        R: Read,
        F: FnMut(usize),
    {
        let mut hasher = algorithm.hasher();
        loop {
            let bytes_read = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&self.buffer[..bytes_read]);
            on_chunk(bytes_read);
        }
        Ok(hasher.finish())
    }
}

/// Hash a single file with a freshly allocated buffer
pub fn compute_digest(path: &Path, algorithm: HashAlgorithm, buffer_size: usize) -> Result<Digest> {
    HashStream::new(buffer_size)?.digest_file(path, algorithm)
}
