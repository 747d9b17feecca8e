//! Session log rotation.
//!
//! Keeps the newest N `.jsonl` files in the log directory uncompressed and
//! moves everything older into `archive/` as `.gz`. Rotation replaces whole
//! files; it never rewrites past records. Files that cannot be read are
//! skipped and reported, and a half-written archive is removed rather than
//! left behind.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

use crate::config::ALERTS_FILE_NAME;

/// Default retention: how many recent logs stay uncompressed.
pub const KEEP_LAST_N: usize = 10;

const ARCHIVE_DIR_NAME: &str = "archive";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    pub kept: usize,
    pub archived: usize,
    pub skipped: Vec<PathBuf>,
}

/// Rotate `.jsonl` logs in `log_dir`, newest-first by mtime.
///
/// `exclude` lists files that must never be touched (the active session
/// log); they count toward `kept` but not toward the retention window.
/// With `dry_run` the candidates are counted but nothing is written.
pub fn rotate_logs(
    log_dir: &Path,
    keep: usize,
    dry_run: bool,
    exclude: &[PathBuf],
) -> io::Result<RotationOutcome> {
    std::fs::create_dir_all(log_dir)?;
    let archive_dir = log_dir.join(ARCHIVE_DIR_NAME);
    std::fs::create_dir_all(&archive_dir)?;

    let exclude: Vec<PathBuf> = exclude
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let mut outcome = RotationOutcome::default();

    for (index, path) in collect_jsonl(log_dir)?.into_iter().enumerate() {
        let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
        if exclude.contains(&resolved) {
            outcome.kept += 1;
            continue;
        }
        if index < keep {
            outcome.kept += 1;
            continue;
        }
        if dry_run {
            outcome.archived += 1;
            continue;
        }

        let archive_path = archive_dir.join(format!(
            "{}.gz",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        match compress_into(&path, &archive_path) {
            Ok(()) => {
                std::fs::remove_file(&path)?;
                outcome.archived += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unrotatable log");
                outcome.skipped.push(path);
                if archive_path.exists() {
                    std::fs::remove_file(&archive_path).ok();
                }
            }
        }
    }

    Ok(outcome)
}

/// All rotatable `.jsonl` files in the directory, newest first. The alert
/// stream shares the directory but is a separate append-only contract and
/// never rotates with the session logs.
fn collect_jsonl(log_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.file_name().is_some_and(|n| n == ALERTS_FILE_NAME) {
            continue;
        }
        if path.extension().is_some_and(|e| e == "jsonl") && path.is_file() {
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push((mtime, path));
        }
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

fn compress_into(source: &Path, target: &Path) -> io::Result<()> {
    let mut input = File::open(source)?;
    let mut encoder = GzEncoder::new(File::create(target)?, Compression::default());
    let mut buf = [0u8; 1024 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
    }
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn seed_logs(dir: &Path, count: usize) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for i in 0..count {
            let path = dir.join(format!("monitor_run_2025010{i}T000000Z_{i}.jsonl"));
            std::fs::write(&path, format!("{{\"event\":\"start\",\"n\":{i}}}\n")).unwrap();
            // Distinct mtimes so the newest-first order is deterministic.
            std::thread::sleep(Duration::from_millis(10));
            paths.push(path);
        }
        paths
    }

    #[test]
    fn retention_window_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        seed_logs(dir.path(), 7);

        let outcome = rotate_logs(dir.path(), 3, false, &[]).unwrap();
        assert_eq!(outcome.kept, 3);
        assert_eq!(outcome.archived, 4);
        assert!(outcome.skipped.is_empty());

        let remaining = collect_jsonl(dir.path()).unwrap();
        assert_eq!(remaining.len(), 3);

        let archived: Vec<_> = std::fs::read_dir(dir.path().join(ARCHIVE_DIR_NAME))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".gz"))
            .collect();
        assert_eq!(archived.len(), 4);
    }

    #[test]
    fn newest_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        let paths = seed_logs(dir.path(), 4);

        rotate_logs(dir.path(), 2, false, &[]).unwrap();

        // The two written last (highest mtime) remain.
        assert!(paths[3].exists());
        assert!(paths[2].exists());
        assert!(!paths[1].exists());
        assert!(!paths[0].exists());
    }

    #[test]
    fn excluded_files_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let paths = seed_logs(dir.path(), 3);

        let outcome = rotate_logs(dir.path(), 0, false, &[paths[0].clone()]).unwrap();
        assert!(paths[0].exists());
        assert_eq!(outcome.kept, 1);
        assert_eq!(outcome.archived, 2);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = seed_logs(dir.path(), 5);

        let outcome = rotate_logs(dir.path(), 2, true, &[]).unwrap();
        assert_eq!(outcome.archived, 3);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn archives_decompress_to_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor_run_x_1.jsonl");
        let content = "{\"event\":\"start\"}\n{\"event\":\"stop\"}\n";
        std::fs::write(&path, content).unwrap();

        rotate_logs(dir.path(), 0, false, &[]).unwrap();

        let gz = dir
            .path()
            .join(ARCHIVE_DIR_NAME)
            .join("monitor_run_x_1.jsonl.gz");
        let mut decoder = flate2::read::GzDecoder::new(File::open(gz).unwrap());
        let mut restored = String::new();
        decoder.read_to_string(&mut restored).unwrap();
        assert_eq!(restored, content);
    }

    #[test]
    fn alerts_stream_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ALERTS_FILE_NAME), "{\"alert_id\":\"a\"}\n").unwrap();
        seed_logs(dir.path(), 2);

        let outcome = rotate_logs(dir.path(), 0, false, &[]).unwrap();
        assert_eq!(outcome.archived, 2);
        assert!(dir.path().join(ALERTS_FILE_NAME).exists());
    }

    #[test]
    fn rotation_is_idempotent_on_an_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = rotate_logs(dir.path(), 10, false, &[]).unwrap();
        assert_eq!(outcome, RotationOutcome::default());
    }
}
