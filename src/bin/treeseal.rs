//! # Treeseal CLI - Seal a directory, check it later
//!
//! Command-line front end for the treeseal library.
//!
//! ## Features
//! - Scan a directory into a self-authenticating manifest document
//! - Hash file contents with SHA-1, xxHash64 or xxHash32
//! - Verify a directory or a backup copy against a document
//!
//! ## Usage
//! ```bash
//! # Record names, sizes and SHA-1 digests of a whole tree
//! treeseal scan ./photos -r -c -o photos.json
//!
//! # Same with xxHash64 and a progress bar
//! treeseal scan ./photos -r -c -x --status-bar -o photos.json
//!
//! # Check a backup copy
//! treeseal verify photos.json /mnt/backup/photos
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use treeseal::hashing::DEFAULT_BUFFER_SIZE;
use treeseal::manifest::{self, DecodeOptions};
use treeseal::utils::format_bytes;
use treeseal::{HashAlgorithm, ManifestCodec, ProgressInfo, ScanOptions, TreeWalker, Verifier};

/// Treeseal CLI - Self-authenticating directory manifests
#[derive(Parser)]
#[command(name = "treeseal")]
#[command(version)]
#[command(about = "Record a directory tree in a tamper-evident manifest and verify copies against it")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory and write a manifest document
    Scan {
        /// Directory to scan
        src: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Compute a content digest for every file (SHA-1 unless -x or -y)
        #[arg(short = 'c', long)]
        checksum: bool,

        /// Use xxHash64 digests
        #[arg(short = 'x', long, requires = "checksum", conflicts_with = "xxhash32")]
        xxhash64: bool,

        /// Use xxHash32 digests
        #[arg(short = 'y', long, requires = "checksum")]
        xxhash32: bool,

        /// Include entries whose name starts with '.'
        #[arg(short, long)]
        include_hidden: bool,

        /// Read buffer size in bytes
        #[arg(short, long = "buf-size", default_value_t = DEFAULT_BUFFER_SIZE)]
        buf_size: usize,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show a progress bar while hashing
        #[arg(long)]
        status_bar: bool,

        /// Number of hashing threads (defaults to CPU count)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Verify a directory against a manifest document
    Verify {
        /// Manifest document produced by `scan`
        document: PathBuf,

        /// Directory to check
        dir: PathBuf,

        /// Read buffer size in bytes
        #[arg(short, long = "buf-size", default_value_t = DEFAULT_BUFFER_SIZE)]
        buf_size: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Main command runner
///
/// Returns `false` when the command ran but found problems.
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Scan {
            src,
            recursive,
            checksum,
            xxhash64,
            xxhash32,
            include_hidden,
            buf_size,
            output,
            status_bar,
            jobs,
        } => {
            let algorithm = if xxhash64 {
                HashAlgorithm::XxHash64
            } else if xxhash32 {
                HashAlgorithm::XxHash32
            } else {
                HashAlgorithm::Sha1
            };
            let mut options = ScanOptions::default()
                .with_recursive(recursive)
                .with_include_hidden(include_hidden)
                .with_compute_digests(checksum)
                .with_digest_algorithm(algorithm)
                .with_buffer_size(buf_size);
            if let Some(jobs) = jobs {
                options = options.with_parallel_workers(jobs);
            }
            cmd_scan(&src, options, output.as_deref(), status_bar)?;
            Ok(true)
        }
        Commands::Verify {
            document,
            dir,
            buf_size,
        } => cmd_verify(&document, &dir, buf_size),
    }
}

/// Scan a directory and emit its manifest document
///
/// The document goes to `output` through an atomic rename, or to stdout.
/// Everything else is printed to stderr so stdout stays a clean document.
fn cmd_scan(
    src: &Path,
    options: ScanOptions,
    output: Option<&Path>,
    status_bar: bool,
) -> Result<()> {
    let start = Instant::now();
    let walker = TreeWalker::new(options);

    let scanned = if status_bar {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Listing files...");

        let bar = pb.clone();
        let result = walker.scan_with_progress(
            src,
            Some(move |info: ProgressInfo| {
                if bar.length().is_none() {
                    // First report: the tree is listed and its size known
                    bar.set_length(info.total_bytes.unwrap_or(0));
                    if let Ok(style) = ProgressStyle::default_bar().template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
                    ) {
                        bar.set_style(style.progress_chars("#>-"));
                    }
                }
                bar.set_position(info.bytes_processed);
                bar.set_message(format!(
                    "{}/{} files",
                    info.processed,
                    info.total.unwrap_or(info.processed)
                ));
            }),
        );
        pb.finish_and_clear();
        result
    } else {
        walker.scan(src)
    };
    let manifest = scanned.with_context(|| format!("failed to scan {}", src.display()))?;

    eprintln!(
        "Found {} files containing {}",
        manifest.total_files.to_string().cyan(),
        format_bytes(manifest.total_size).cyan()
    );

    match output {
        Some(path) => {
            let self_digest = manifest::write_document(path, &manifest)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{} Wrote {} ({})",
                "✓".green().bold(),
                path.display().to_string().cyan(),
                self_digest.to_hex().yellow()
            );
        }
        None => ManifestCodec::encode_to(&manifest, io::stdout().lock())?,
    }

    eprintln!("Operation took {}", format_duration(round_millis(start.elapsed())));
    Ok(())
}

/// Verify a directory against a manifest document
///
/// Every mismatch is printed as it is found. Returns `false` if any file
/// differs from the document.
fn cmd_verify(document_path: &Path, dir: &Path, buf_size: usize) -> Result<bool> {
    let start = Instant::now();

    let document = manifest::read_document(document_path, DecodeOptions::for_verification())
        .with_context(|| format!("failed to load {}", document_path.display()))?;

    println!(
        "{} {} against {}",
        "Verifying".blue().bold(),
        dir.display().to_string().cyan(),
        document.self_digest_hex().yellow()
    );

    let mut verifier = Verifier::new(buf_size)?;
    let mut verification = verifier
        .verify(&document, dir)
        .with_context(|| format!("failed to verify {}", dir.display()))?;

    let mut failed = 0usize;
    for mismatch in verification.by_ref() {
        failed += 1;
        println!("  {} {}", "✗".red().bold(), mismatch.to_string().red());
    }
    let checked = verification.files_checked();

    if failed == 0 {
        println!(
            "{} All {} files verified",
            "✓".green().bold(),
            checked.to_string().cyan()
        );
    } else {
        println!(
            "{} {} of {} files failed verification",
            "✗".red().bold(),
            failed.to_string().red(),
            checked
        );
    }
    println!("  Time: {}", format_duration(round_millis(start.elapsed())).to_string().cyan());

    Ok(failed == 0)
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
