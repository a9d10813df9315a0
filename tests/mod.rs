//! Main test module for treeseal
//!
//! This module includes all test suites:
//! - Integration tests for scan, seal and verify scenarios
//! - Chaos tests for damaged documents and hostile trees
//! - Property-based tests for codec and walker invariants

pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::treeseal::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn sealed_scan(root: &Path) -> ManifestDocument {
        let options = ScanOptions::default()
            .with_recursive(true)
            .with_compute_digests(true);
        let manifest = TreeWalker::new(options).scan(root).unwrap();
        ManifestCodec::decode(&ManifestCodec::encode(&manifest).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();

        let document = sealed_scan(temp_dir.path());
        assert_eq!(document.manifest().total_files, 0);
        assert_eq!(document.manifest().total_size, 0);
        assert!(document.manifest().root.is_empty());

        // Files added later are not tracked
        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();
        assert!(verification::verify(&document, temp_dir.path())
            .unwrap()
            .is_valid());
    }

    #[test]
    fn test_empty_subdirectories_are_recorded() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b/c")).unwrap();

        let document = sealed_scan(temp_dir.path());
        let manifest = document.manifest();
        assert_eq!(manifest.total_files, 0);
        assert_eq!(manifest.directory_count(), 3);
        assert!(manifest
            .get(Path::new("a/b/c"))
            .and_then(Entry::as_directory)
            .unwrap()
            .children
            .is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();

        #[allow(unused_mut)]
        let mut special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "quote\"inside.txt",
            "unicode_文件.txt",
            "emoji_🚀.txt",
            "tab\tname.txt",
        ];
        #[cfg(unix)]
        special_names.push("back\\slash.txt");

        for name in &special_names {
            fs::write(temp_dir.path().join(name), name.as_bytes()).unwrap();
        }

        let document = sealed_scan(temp_dir.path());
        assert_eq!(document.manifest().total_files as usize, special_names.len());
        for name in &special_names {
            assert!(
                document.manifest().root.contains_key(*name),
                "missing {:?}",
                name
            );
        }
        assert!(verification::verify(&document, temp_dir.path())
            .unwrap()
            .is_valid());
    }

    #[test]
    fn test_deep_nesting() {
        let temp_dir = TempDir::new().unwrap();
        let mut deep = temp_dir.path().to_path_buf();
        for _ in 0..70 {
            deep.push("d");
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("bottom.txt"), "deep").unwrap();

        let document = sealed_scan(temp_dir.path());
        assert_eq!(document.manifest().total_files, 1);
        assert_eq!(document.manifest().directory_count(), 70);

        let files = document.manifest().files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0.components().count(), 71);
        assert!(verification::verify(&document, temp_dir.path())
            .unwrap()
            .is_valid());
    }

    #[test]
    fn test_nesting_beyond_limit_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let mut deep = temp_dir.path().to_path_buf();
        for _ in 0..=MAX_DEPTH {
            deep.push("d");
        }
        fs::create_dir_all(&deep).unwrap();

        let err = TreeWalker::new(ScanOptions::default().with_recursive(true))
            .scan(temp_dir.path())
            .unwrap_err();
        assert!(matches!(err, TreesealError::TooDeep { .. }), "{:?}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_replacing_a_file_is_reported() {
        use std::process::Command;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "hello123").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "bravo").unwrap();
        let document = sealed_scan(temp_dir.path());

        fs::remove_file(temp_dir.path().join("a.txt")).unwrap();
        let status = Command::new("mkfifo")
            .arg(temp_dir.path().join("a.txt"))
            .status()
            .unwrap();
        assert!(status.success());

        // Opening a FIFO for reading would block forever
        let (tx, rx) = std::sync::mpsc::channel();
        let root = temp_dir.path().to_path_buf();
        std::thread::spawn(move || {
            tx.send(verification::verify(&document, &root).unwrap()).unwrap();
        });
        let report = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("verification blocked on a FIFO");

        assert_eq!(report.files_checked, 2);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(
            report.mismatches[0].kind,
            MismatchKind::Unreadable {
                reason: "not a regular file".to_string()
            }
        );
    }

    #[test]
    fn test_zero_byte_file_digest() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("empty"), b"").unwrap();

        let document = sealed_scan(temp_dir.path());
        let entry = document.manifest().root["empty"].as_file().unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(
            entry.digest.as_ref().unwrap().to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_recorded() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let document = sealed_scan(temp_dir.path());
        assert_eq!(document.manifest().root["run.sh"].permissions(), 0o750);
    }
}
