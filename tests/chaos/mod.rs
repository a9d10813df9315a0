//! Chaos testing for treeseal
//!
//! Damages documents and directory trees in random ways and checks that every
//! kind of damage is reported, never silently accepted and never a panic.

use ::treeseal::hashing::digest_bytes;
use ::treeseal::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Chaos testing fixture: a sealed tree plus its encoded document
pub struct SealChaosTest {
    pub temp_dir: TempDir,
    pub manifest: Manifest,
    pub encoded: Vec<u8>,
    pub chaos_engine: ChaosEngine,
}

impl SealChaosTest {
    pub fn new(seed: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut chaos_engine = ChaosEngine::new(seed);

        for dir_idx in 0..4 {
            let dir = temp_dir.path().join(format!("dir_{}", dir_idx));
            fs::create_dir_all(&dir).unwrap();
            for file_idx in 0..8 {
                let content = chaos_engine.random_bytes(1..3000);
                fs::write(dir.join(format!("file_{}.dat", file_idx)), content).unwrap();
            }
        }

        let options = ScanOptions::default()
            .with_recursive(true)
            .with_compute_digests(true);
        let manifest = TreeWalker::new(options).scan(temp_dir.path()).unwrap();
        let encoded = ManifestCodec::encode(&manifest).unwrap();

        Self {
            temp_dir,
            manifest,
            encoded,
            chaos_engine,
        }
    }

    pub fn document(&self) -> ManifestDocument {
        ManifestCodec::decode_with(&self.encoded, DecodeOptions::for_verification()).unwrap()
    }

    /// Relative paths of every sealed file
    pub fn files(&self) -> Vec<PathBuf> {
        self.manifest
            .files()
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    }
}

/// Chaos engine for introducing failures
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn random_bytes(&mut self, size_range: std::ops::Range<usize>) -> Vec<u8> {
        let size = self.rng.random_range(size_range);
        let mut bytes = vec![0u8; size];
        self.rng.fill(&mut bytes[..]);
        bytes
    }

    /// Overwrite up to `count` random bytes of a buffer with different values
    pub fn scramble(&mut self, bytes: &mut [u8], count: usize) {
        for _ in 0..count {
            let idx = self.rng.random_range(0..bytes.len());
            let mask = self.rng.random_range(1..=255u8);
            bytes[idx] ^= mask;
        }
    }

    /// Remove random characters from a document
    pub fn drop_bytes(&mut self, bytes: &mut Vec<u8>, count: usize) {
        for _ in 0..count.min(bytes.len()) {
            let idx = self.rng.random_range(0..bytes.len());
            bytes.remove(idx);
        }
    }

    /// Modify random files under `root`, returning the relative paths
    pub fn corrupt_random_files(
        &mut self,
        root: &Path,
        files: &[PathBuf],
        count: usize,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let mut candidates = files.to_vec();
        let mut corrupted = Vec::new();

        for _ in 0..count.min(candidates.len()) {
            let idx = self.rng.random_range(0..candidates.len());
            let relative = candidates.remove(idx);
            let path = root.join(&relative);

            let mut content = fs::read(&path)?;
            if content.is_empty() {
                content.push(self.rng.random());
            } else {
                self.scramble(&mut content, 10);
            }
            fs::write(&path, content)?;
            corrupted.push(relative);
        }

        Ok(corrupted)
    }

    /// Delete random files under `root`, returning the relative paths
    pub fn delete_random_files(
        &mut self,
        root: &Path,
        files: &[PathBuf],
        count: usize,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let mut candidates = files.to_vec();
        let mut deleted = Vec::new();

        for _ in 0..count.min(candidates.len()) {
            let idx = self.rng.random_range(0..candidates.len());
            let relative = candidates.remove(idx);
            fs::remove_file(root.join(&relative))?;
            deleted.push(relative);
        }

        Ok(deleted)
    }
}

/// Recompute the self digest of a hand-edited document
pub fn resign(document: &str) -> Vec<u8> {
    let placeholder = "0".repeat(40);
    let zeroed = format!("[\"{}{}", placeholder, &document[42..]);
    let digest = digest_bytes(HashAlgorithm::Sha1, zeroed.as_bytes());
    format!("[\"{}{}", digest, &document[42..]).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_byte_corruption() {
        let mut chaos = SealChaosTest::new(1);
        let original = chaos.encoded.clone();

        for round in 0..200 {
            let mut damaged = original.clone();
            let count = 1 + round % 5;
            chaos.chaos_engine.scramble(&mut damaged, count);
            if damaged == original {
                continue;
            }
            let err = ManifestCodec::decode(&damaged).unwrap_err();
            assert!(err.is_format(), "round {}: {}", round, err);
        }
    }

    #[test]
    fn test_dropped_bytes() {
        let mut chaos = SealChaosTest::new(2);
        let original = chaos.encoded.clone();

        for round in 0..100 {
            let mut damaged = original.clone();
            chaos.chaos_engine.drop_bytes(&mut damaged, 1 + round % 3);
            assert!(ManifestCodec::decode(&damaged).unwrap_err().is_format());
        }
    }

    #[test]
    fn test_every_truncation_rejected() {
        let chaos = SealChaosTest::new(3);
        for len in 0..chaos.encoded.len() {
            let err = ManifestCodec::decode(&chaos.encoded[..len]).unwrap_err();
            assert!(err.is_format(), "prefix of {} bytes: {}", len, err);
        }
    }

    #[test]
    fn test_random_garbage_rejected() {
        let mut engine = ChaosEngine::new(4);
        for _ in 0..200 {
            let garbage = engine.random_bytes(0..512);
            assert!(ManifestCodec::decode(&garbage).unwrap_err().is_format());
        }
    }

    #[test]
    fn test_signed_but_malformed_payloads() {
        let cases = [
            // Not JSON after the digest
            r#"["0000000000000000000000000000000000000000",{"total_files":0"#,
            // Wrong envelope arity
            r#"["0000000000000000000000000000000000000000",{"total_files":0,"total_size":0,"files_list":{}},1]"#,
            // Payload is not an object
            r#"["0000000000000000000000000000000000000000",[]]"#,
            // Missing totals
            r#"["0000000000000000000000000000000000000000",{"files_list":{}}]"#,
            // Entry escaping the root
            r#"["0000000000000000000000000000000000000000",{"total_files":1,"total_size":0,"files_list":{"..":{"type":0,"mtime":0,"size":0,"perms":420}}}]"#,
            // Nested separator in a name
            r#"["0000000000000000000000000000000000000000",{"total_files":1,"total_size":0,"files_list":{"a/b":{"type":0,"mtime":0,"size":0,"perms":420}}}]"#,
            // Totals lie about the tree
            r#"["0000000000000000000000000000000000000000",{"total_files":5,"total_size":0,"files_list":{}}]"#,
        ];

        for case in cases {
            let signed = resign(case);
            let err = ManifestCodec::decode(&signed).unwrap_err();
            assert!(err.is_format(), "{} accepted: {}", case, err);
            assert!(
                !matches!(err, TreesealError::SelfDigestMismatch { .. }),
                "{} failed the digest check",
                case
            );
        }
    }

    #[test]
    fn test_corrupted_tree_reported() {
        let mut chaos = SealChaosTest::new(5);
        let files = chaos.files();
        let root = chaos.temp_dir.path().to_path_buf();

        let corrupted = chaos
            .chaos_engine
            .corrupt_random_files(&root, &files, 6)
            .unwrap();
        let deleted: Vec<PathBuf> = {
            let remaining: Vec<PathBuf> = files
                .iter()
                .filter(|f| !corrupted.contains(f))
                .cloned()
                .collect();
            chaos
                .chaos_engine
                .delete_random_files(&root, &remaining, 4)
                .unwrap()
        };
        info!(
            "Corrupted {} files and deleted {}",
            corrupted.len(),
            deleted.len()
        );

        let document = chaos.document();
        let report = verification::verify(&document, &root).unwrap();

        assert_eq!(report.files_checked, files.len());
        assert_eq!(report.mismatches.len(), corrupted.len() + deleted.len());
        for mismatch in &report.mismatches {
            if deleted.contains(&mismatch.path) {
                assert_eq!(mismatch.kind, MismatchKind::Missing);
            } else {
                assert!(corrupted.contains(&mismatch.path));
                assert!(mismatch.actual().is_some());
            }
        }
    }

    #[test]
    fn test_whole_directory_removed() {
        let chaos = SealChaosTest::new(6);
        let root = chaos.temp_dir.path();
        fs::remove_dir_all(root.join("dir_2")).unwrap();

        let report = verification::verify(&chaos.document(), root).unwrap();
        assert_eq!(report.mismatches.len(), 8);
        assert_eq!(report.missing().count(), 8);
        assert!(report
            .mismatches
            .iter()
            .all(|m| m.path.starts_with("dir_2")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_reported() {
        use std::os::unix::fs::PermissionsExt;

        let chaos = SealChaosTest::new(7);
        let root = chaos.temp_dir.path();
        let locked = root.join("dir_0").join("file_3.dat");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read it anyway
        if fs::File::open(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
            return;
        }

        let report = verification::verify(&chaos.document(), root).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(
            report.mismatches[0].path,
            Path::new("dir_0").join("file_3.dat")
        );
        assert!(matches!(
            report.mismatches[0].kind,
            MismatchKind::Unreadable { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_aborts_scan() {
        use std::os::unix::fs::PermissionsExt;

        let chaos = SealChaosTest::new(8);
        let root = chaos.temp_dir.path();
        let locked = root.join("dir_1").join("file_0.dat");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        if fs::File::open(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
            return;
        }

        let options = ScanOptions::default()
            .with_recursive(true)
            .with_compute_digests(true);
        let result = TreeWalker::new(options).scan(root);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(result.unwrap_err().is_io());
    }
}
