//! Self-authenticating manifest documents
//!
//! A manifest is persisted as a compact JSON array of two elements:
//!
//! ```text
//! ["<sha1>",{"total_files":N,"total_size":N,"files_list":{...}}]
//!
//! file:      {"type":0,"mtime":N,"size":N,"perms":N,"hash":"<hex>"}
//! directory: {"type":1,"perms":N,"list":{...}}
//! ```
//!
//! The first element is the SHA-1 of the document itself, computed while that
//! element still holds forty `'0'` characters. Encoding serializes with the
//! placeholder, hashes the bytes and patches the digest into the placeholder's
//! span. Decoding finds the first quoted string, zero-fills it, re-hashes and
//! compares before it trusts anything in the payload.
//!
//! The envelope digest is always SHA-1 regardless of the per-file algorithm,
//! so the patched span is always exactly forty characters wide.
//!
//! ## Example
//!
//! ```rust
//! use treeseal::manifest::ManifestCodec;
//! use treeseal::types::Manifest;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = ManifestCodec::encode(&Manifest::default())?;
//! let document = ManifestCodec::decode(&bytes)?;
//! assert_eq!(document.self_digest_hex().len(), 40);
//! assert_eq!(document.manifest(), &Manifest::default());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TreesealError};
use crate::hashing::{digest_bytes, Digest, HashAlgorithm};
use crate::types::{
    DirectoryEntry, Entry, EntryKind, FileEntry, Manifest, MAX_DEPTH, MAX_PERMISSIONS,
};
use crate::utils;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Width of the embedded self digest in characters
pub const SELF_DIGEST_LEN: usize = 40;

/// Algorithm of the embedded self digest
pub const SELF_DIGEST_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha1;

const PLACEHOLDER: &str = "0000000000000000000000000000000000000000";

/// Bracket nesting of a file inside [`MAX_DEPTH`] directories
const MAX_NESTING: usize = 2 * MAX_DEPTH + 4;

/// A decoded document whose self digest has been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    self_digest: Digest,
    manifest: Manifest,
}

impl ManifestDocument {
    /// Digest the document carried for itself
    pub fn self_digest(&self) -> &Digest {
        &self.self_digest
    }

    /// Self digest as 40 lowercase hex characters
    pub fn self_digest_hex(&self) -> String {
        self.self_digest.to_hex()
    }

    /// The manifest payload
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Take the manifest payload
    pub fn into_manifest(self) -> Manifest {
        self.manifest
    }
}

/// Structural requirements applied while decoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Every file entry must carry a digest
    pub require_digests: bool,
}

impl DecodeOptions {
    /// Options used before verification: digests are mandatory
    pub fn for_verification() -> Self {
        Self {
            require_digests: true,
        }
    }
}

/// Encoder and decoder for manifest documents
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestCodec;

impl ManifestCodec {
    /// Serialize a manifest into a self-authenticating document
    ///
    /// # Errors
    ///
    /// Returns [`TreesealError::Format`] if the manifest could not be decoded
    /// again: inconsistent totals, out-of-range permissions, unusable names,
    /// map keys that differ from entry names, or directories nested deeper
    /// than [`MAX_DEPTH`].
    pub fn encode(manifest: &Manifest) -> Result<Vec<u8>> {
        validate_manifest(manifest)?;

        let document = WireDocument(
            PLACEHOLDER,
            WireManifest {
                total_files: manifest.total_files,
                total_size: manifest.total_size,
                files_list: WireList(&manifest.root),
            },
        );
        let mut bytes = serde_json::to_vec(&document)?;

        let span = locate_self_digest(&bytes)?;
        let digest = digest_bytes(SELF_DIGEST_ALGORITHM, &bytes);
        bytes[span].copy_from_slice(digest.to_hex().as_bytes());

        debug!(
            "Encoded manifest with {} files into {} bytes (self digest {})",
            manifest.total_files,
            bytes.len(),
            digest
        );
        Ok(bytes)
    }

    /// Encode a manifest and write it to `writer`
    pub fn encode_to<W: Write>(manifest: &Manifest, mut writer: W) -> Result<()> {
        let bytes = Self::encode(manifest)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Decode a document, allowing file entries without digests
    pub fn decode(bytes: &[u8]) -> Result<ManifestDocument> {
        Self::decode_with(bytes, DecodeOptions::default())
    }

    /// Decode a document with explicit structural requirements
    ///
    /// # Errors
    ///
    /// - [`TreesealError::Format`] if the first quoted string is not forty hex
    ///   characters, or if any part of the payload fails validation
    /// - [`TreesealError::SelfDigestMismatch`] if the document was altered
    /// - [`TreesealError::Json`] if the bytes are not JSON
    pub fn decode_with(bytes: &[u8], options: DecodeOptions) -> Result<ManifestDocument> {
        let span = locate_self_digest(bytes)?;
        let claimed = &bytes[span.clone()];
        if !claimed.iter().all(u8::is_ascii_hexdigit) {
            return Err(TreesealError::format(format!(
                "invalid self digest ({})",
                String::from_utf8_lossy(claimed)
            )));
        }
        let claimed = String::from_utf8_lossy(claimed).into_owned();

        let mut hasher = SELF_DIGEST_ALGORITHM.hasher();
        hasher.update(&bytes[..span.start]);
        hasher.update(PLACEHOLDER.as_bytes());
        hasher.update(&bytes[span.end..]);
        let actual = hasher.finish();

        if claimed != actual.to_hex() {
            return Err(TreesealError::SelfDigestMismatch {
                expected: claimed,
                actual: actual.to_hex(),
            });
        }
        trace!("Self digest {} verified", actual);

        check_nesting(bytes)?;
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        deserializer.disable_recursion_limit();
        let value = Value::deserialize(&mut deserializer)?;
        deserializer.end()?;
        let payload = match value.as_array().map(Vec::as_slice) {
            Some([Value::String(_), payload]) => payload,
            _ => {
                return Err(TreesealError::format(
                    "document is not a two-element [digest, manifest] array",
                ))
            }
        };

        let manifest = parse_manifest(payload, options)?;
        debug!(
            "Decoded manifest with {} files, {} bytes",
            manifest.total_files, manifest.total_size
        );

        Ok(ManifestDocument {
            self_digest: actual,
            manifest,
        })
    }
}

/// Encode a manifest and write it atomically to `path`
///
/// Returns the embedded self digest.
pub fn write_document(path: &Path, manifest: &Manifest) -> Result<Digest> {
    let bytes = ManifestCodec::encode(manifest)?;
    utils::atomic_write(path, &bytes)?;
    let span = locate_self_digest(&bytes)?;
    Digest::from_hex(&String::from_utf8_lossy(&bytes[span]))
}

/// Read and decode the document stored at `path`
pub fn read_document(path: &Path, options: DecodeOptions) -> Result<ManifestDocument> {
    let bytes = fs::read(path).map_err(|e| TreesealError::path_io(path, e))?;
    ManifestCodec::decode_with(&bytes, options)
}

/// Reject documents nested deeper than any encodable manifest
///
/// Runs before parsing, which has no recursion limit of its own.
fn check_nesting(bytes: &[u8]) -> Result<()> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(TreesealError::format(format!(
                        "document nests deeper than {} directories",
                        MAX_DEPTH
                    )));
                }
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Span of the first quoted string, which must be exactly forty bytes long
fn locate_self_digest(bytes: &[u8]) -> Result<Range<usize>> {
    let start = bytes
        .iter()
        .position(|&b| b == b'"')
        .ok_or_else(|| TreesealError::format("no self digest found"))?
        + 1;
    let len = bytes[start..]
        .iter()
        .position(|&b| b == b'"')
        .ok_or_else(|| TreesealError::format("unterminated self digest"))?;

    if len != SELF_DIGEST_LEN {
        return Err(TreesealError::format(format!(
            "length of self digest is invalid ({})",
            len
        )));
    }
    Ok(start..start + len)
}

#[derive(Serialize)]
struct WireDocument<'a>(&'a str, WireManifest<'a>);

#[derive(Serialize)]
struct WireManifest<'a> {
    total_files: u64,
    total_size: u64,
    files_list: WireList<'a>,
}

struct WireList<'a>(&'a BTreeMap<String, Entry>);

impl Serialize for WireList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, entry)| (name, WireEntry::from(entry))))
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireEntry<'a> {
    File {
        #[serde(rename = "type")]
        kind: u64,
        mtime: u64,
        size: u64,
        perms: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        hash: Option<&'a Digest>,
    },
    Directory {
        #[serde(rename = "type")]
        kind: u64,
        perms: u32,
        list: WireList<'a>,
    },
}

impl<'a> From<&'a Entry> for WireEntry<'a> {
    fn from(entry: &'a Entry) -> Self {
        match entry {
            Entry::File(file) => WireEntry::File {
                kind: EntryKind::File.tag(),
                mtime: file.modified_ms,
                size: file.size,
                perms: file.permissions,
                hash: file.digest.as_ref(),
            },
            Entry::Directory(dir) => WireEntry::Directory {
                kind: EntryKind::Directory.tag(),
                perms: dir.permissions,
                list: WireList(&dir.children),
            },
        }
    }
}

/// Check that a name can stand for exactly one path segment
///
/// Separators are those of the host platform, so `a\b` is a valid name on
/// unix and two segments on windows.
fn validate_name(name: &str, path: &Path) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(segment)), None) if segment == name
    );
    if !single || name.contains('\0') {
        return Err(TreesealError::format(format!(
            "invalid entry name {:?} at {}",
            name,
            path.display()
        )));
    }
    Ok(())
}

fn check_permissions(perms: u32, path: &Path) -> Result<()> {
    if perms > MAX_PERMISSIONS {
        return Err(TreesealError::format(format!(
            "{}: invalid perms (0{:o})",
            path.display(),
            perms
        )));
    }
    Ok(())
}

fn check_totals(manifest: &Manifest) -> Result<()> {
    let totals = manifest.computed_totals();
    if totals.files != manifest.total_files || totals.bytes != manifest.total_size {
        return Err(TreesealError::format(format!(
            "totals ({} files, {} bytes) do not match entries ({} files, {} bytes)",
            manifest.total_files, manifest.total_size, totals.files, totals.bytes
        )));
    }
    Ok(())
}

/// Validate an in-memory manifest before encoding
fn validate_manifest(manifest: &Manifest) -> Result<()> {
    fn walk(entries: &BTreeMap<String, Entry>, prefix: &Path, depth: usize) -> Result<()> {
        for (key, entry) in entries {
            let path = prefix.join(key);
            validate_name(key, &path)?;
            if key != entry.name() {
                return Err(TreesealError::format(format!(
                    "entry {:?} stored under key {:?}",
                    entry.name(),
                    key
                )));
            }
            check_permissions(entry.permissions(), &path)?;
            if let Entry::Directory(dir) = entry {
                if depth >= MAX_DEPTH {
                    return Err(TreesealError::format(format!(
                        "{}: directories nest deeper than {} levels",
                        path.display(),
                        MAX_DEPTH
                    )));
                }
                walk(&dir.children, &path, depth + 1)?;
            }
        }
        Ok(())
    }

    walk(&manifest.root, Path::new(""), 0)?;
    check_totals(manifest)
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "undefined".to_string(), Value::to_string)
}

fn non_negative_integer(value: Option<&Value>, what: &str, path: &Path) -> Result<u64> {
    value.and_then(Value::as_u64).ok_or_else(|| {
        TreesealError::format(format!(
            "{}: invalid {} ({})",
            path.display(),
            what,
            describe(value)
        ))
    })
}

fn parse_manifest(value: &Value, options: DecodeOptions) -> Result<Manifest> {
    let obj = value
        .as_object()
        .ok_or_else(|| TreesealError::format(format!("invalid manifest ({})", value)))?;

    let total_files = obj
        .get("total_files")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            TreesealError::format(format!(
                "total_files invalid value ({})",
                describe(obj.get("total_files"))
            ))
        })?;
    let total_size = obj
        .get("total_size")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            TreesealError::format(format!(
                "total_size invalid value ({})",
                describe(obj.get("total_size"))
            ))
        })?;
    let files_list = obj
        .get("files_list")
        .and_then(Value::as_object)
        .ok_or_else(|| TreesealError::format("files_list invalid value"))?;

    let manifest = Manifest {
        total_files,
        total_size,
        root: parse_list(files_list, Path::new(""), options)?,
    };
    check_totals(&manifest)?;
    Ok(manifest)
}

fn parse_list(
    list: &Map<String, Value>,
    prefix: &Path,
    options: DecodeOptions,
) -> Result<BTreeMap<String, Entry>> {
    list.iter()
        .map(|(name, value)| {
            let path = prefix.join(name);
            validate_name(name, &path)?;
            let entry = parse_entry(name, value, &path, options)?;
            Ok((name.clone(), entry))
        })
        .collect()
}

fn parse_entry(name: &str, value: &Value, path: &Path, options: DecodeOptions) -> Result<Entry> {
    let obj = value.as_object().ok_or_else(|| {
        TreesealError::format(format!("{}: invalid entry ({})", path.display(), value))
    })?;

    let kind = obj
        .get("type")
        .and_then(Value::as_u64)
        .and_then(EntryKind::from_tag)
        .ok_or_else(|| {
            TreesealError::format(format!(
                "{}: invalid type ({})",
                path.display(),
                describe(obj.get("type"))
            ))
        })?;

    let perms = non_negative_integer(obj.get("perms"), "perms", path)?;
    let permissions = u32::try_from(perms)
        .ok()
        .filter(|p| *p <= MAX_PERMISSIONS)
        .ok_or_else(|| {
            TreesealError::format(format!("{}: invalid perms (0{:o})", path.display(), perms))
        })?;

    match kind {
        EntryKind::File => {
            let modified_ms = non_negative_integer(obj.get("mtime"), "mtime", path)?;
            let size = non_negative_integer(obj.get("size"), "size", path)?;
            let digest = match obj.get("hash") {
                Some(Value::String(hex)) => Some(Digest::from_hex(hex).map_err(|e| match e {
                    TreesealError::Format(msg) => {
                        TreesealError::format(format!("{}: {}", path.display(), msg))
                    }
                    other => other,
                })?),
                None if !options.require_digests => None,
                other => {
                    return Err(TreesealError::format(format!(
                        "{}: invalid hash ({})",
                        path.display(),
                        describe(other)
                    )))
                }
            };

            Ok(Entry::File(FileEntry {
                name: name.to_string(),
                modified_ms,
                size,
                permissions,
                digest,
            }))
        }
        EntryKind::Directory => {
            let list = obj.get("list").and_then(Value::as_object).ok_or_else(|| {
                TreesealError::format(format!(
                    "{}: invalid list ({})",
                    path.display(),
                    describe(obj.get("list"))
                ))
            })?;

            Ok(Entry::Directory(DirectoryEntry {
                name: name.to_string(),
                permissions,
                children: parse_list(list, path, options)?,
            }))
        }
    }
}

/// Paths of file entries missing a digest
pub(crate) fn files_without_digest(manifest: &Manifest) -> Vec<PathBuf> {
    manifest
        .files()
        .into_iter()
        .filter(|(_, file)| file.digest.is_none())
        .map(|(path, _)| path)
        .collect()
}
