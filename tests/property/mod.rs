//! Property-based testing for treeseal
//!
//! Uses proptest to check codec and walker invariants across randomly
//! generated manifests, file contents and directory trees.

use ::treeseal::hashing::digest_bytes;
use ::treeseal::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

/// Entry names that the document format accepts
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9_. ()-]{0,11}"
}

fn digest_strategy() -> impl Strategy<Value = Digest> {
    prop_oneof![
        any::<[u8; 20]>().prop_map(Digest::Sha1),
        any::<u64>().prop_map(Digest::XxHash64),
        any::<u32>().prop_map(Digest::XxHash32),
    ]
}

fn file_strategy() -> impl Strategy<Value = FileEntry> {
    (
        name_strategy(),
        0u64..4_102_444_800_000,
        0u64..(1 << 40),
        0u32..=MAX_PERMISSIONS,
        prop::option::of(digest_strategy()),
    )
        .prop_map(|(name, modified_ms, size, permissions, digest)| FileEntry {
            name,
            modified_ms,
            size,
            permissions,
            digest,
        })
}

fn index(entries: Vec<Entry>) -> BTreeMap<String, Entry> {
    entries
        .into_iter()
        .map(|entry| (entry.name().to_string(), entry))
        .collect()
}

fn entry_strategy() -> impl Strategy<Value = Entry> {
    file_strategy()
        .prop_map(Entry::File)
        .prop_recursive(4, 64, 6, |inner| {
            (
                name_strategy(),
                0u32..=MAX_PERMISSIONS,
                prop::collection::vec(inner, 0..6),
            )
                .prop_map(|(name, permissions, children)| {
                    Entry::Directory(DirectoryEntry {
                        name,
                        permissions,
                        children: index(children),
                    })
                })
        })
}

fn manifest_strategy() -> impl Strategy<Value = Manifest> {
    prop::collection::vec(entry_strategy(), 0..8)
        .prop_map(|entries| Manifest::from_entries(index(entries)))
}

/// Flat set of files to materialize on disk
fn tree_strategy() -> impl Strategy<Value = Vec<(String, Option<String>, Vec<u8>)>> {
    prop::collection::vec(
        (
            "[a-z]{1,8}\\.(txt|bin)",
            prop::option::of("[a-z]{1,6}"),
            prop::collection::vec(any::<u8>(), 0..2048),
        ),
        0..20,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Decoding an encoded manifest gives back the same tree
    #[test]
    fn encode_decode_identity(manifest in manifest_strategy()) {
        let encoded = ManifestCodec::encode(&manifest).unwrap();
        let document = ManifestCodec::decode(&encoded).unwrap();
        prop_assert_eq!(document.manifest(), &manifest);
    }

    /// Any single-byte change outside the self digest is detected
    #[test]
    fn single_byte_tamper_detected(
        manifest in manifest_strategy(),
        seed in any::<usize>(),
        mask in 1u8..=255,
    ) {
        let mut encoded = ManifestCodec::encode(&manifest).unwrap();
        let outside = encoded.len() - 40;
        let i = seed % outside;
        let position = if i < 2 { i } else { i + 40 };
        encoded[position] ^= mask;

        let err = ManifestCodec::decode(&encoded).unwrap_err();
        prop_assert!(err.is_format(), "byte {} accepted: {}", position, err);
    }

    /// The self digest is always 40 lowercase hex characters in slot one
    #[test]
    fn self_digest_fixed_width(manifest in manifest_strategy()) {
        let encoded = ManifestCodec::encode(&manifest).unwrap();
        prop_assert_eq!(&encoded[..2], b"[\"");
        prop_assert_eq!(encoded[42], b'"');
        prop_assert!(encoded[2..42]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)));

        let document = ManifestCodec::decode(&encoded).unwrap();
        prop_assert_eq!(document.self_digest().algorithm(), HashAlgorithm::Sha1);
        prop_assert_eq!(ManifestCodec::encode(&manifest).unwrap(), encoded);
    }

    /// Digest hex width identifies the algorithm
    #[test]
    fn digest_hex_width(digest in digest_strategy()) {
        let hex = digest.to_hex();
        prop_assert_eq!(hex.len(), digest.algorithm().hex_len());
        prop_assert_eq!(Digest::from_hex(&hex).unwrap(), digest);
    }

    /// Chunking never changes a digest
    #[test]
    fn buffer_size_independence(
        content in prop::collection::vec(any::<u8>(), 0..5000),
        buffer_size in 1usize..700,
    ) {
        for algorithm in [HashAlgorithm::Sha1, HashAlgorithm::XxHash64, HashAlgorithm::XxHash32] {
            let mut stream = HashStream::new(buffer_size).unwrap();
            let streamed = stream
                .digest_reader(Cursor::new(&content), algorithm, |_| {})
                .unwrap();
            prop_assert_eq!(streamed, digest_bytes(algorithm, &content));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Scanning an unchanged tree twice gives identical manifests
    #[test]
    fn rescan_idempotence(files in tree_strategy(), workers in 1usize..4) {
        let temp_dir = TempDir::new().unwrap();
        for (name, dir, content) in &files {
            let parent = match dir {
                Some(dir) => temp_dir.path().join(dir),
                None => temp_dir.path().to_path_buf(),
            };
            fs::create_dir_all(&parent).unwrap();
            fs::write(parent.join(name), content).unwrap();
        }

        let options = ScanOptions::default()
            .with_recursive(true)
            .with_compute_digests(true)
            .with_digest_algorithm(HashAlgorithm::XxHash64)
            .with_buffer_size(512);
        let first = TreeWalker::new(options.clone()).scan(temp_dir.path()).unwrap();
        let second = TreeWalker::new(options.with_parallel_workers(workers))
            .scan(temp_dir.path())
            .unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert!(first.is_consistent());

        let document = ManifestCodec::decode_with(
            &ManifestCodec::encode(&first).unwrap(),
            DecodeOptions::for_verification(),
        )
        .unwrap();
        prop_assert!(verification::verify(&document, temp_dir.path()).unwrap().is_valid());
    }
}
