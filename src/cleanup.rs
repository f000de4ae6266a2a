//! Retention sweep over the artifact partitions.
//!
//! Runs once at startup and then on an interval. Deletions are best-effort:
//! a file that cannot be removed is logged and skipped, and never stops the
//! rest of the sweep.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};

use crate::constants::{CLEANUP_LOG_FILE, DATE_PARTITION_FORMAT};

/// What one sweep did.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files removed.
    pub files_deleted: u64,
    /// Files that could not be removed.
    pub files_failed: u64,
    /// Bytes freed by removed files.
    pub bytes_freed: u64,
    /// Emptied partition directories removed.
    pub partitions_removed: u64,
}

/// Deletes artifacts older than the retention window.
#[derive(Clone, Debug)]
pub struct Cleaner {
    root: PathBuf,
    retention_days: u32,
}

impl Cleaner {
    /// Builds a cleaner over the artifact root.
    pub fn new(root: &Path, retention_days: u32) -> Self {
        Self {
            root: root.to_path_buf(),
            retention_days,
        }
    }

    /// Runs one sweep. Partitions whose date starts before
    /// `now - retention_days` are emptied and removed; with retention 0 that
    /// includes today's partition.
    pub fn run(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let cutoff = Utc::now() - Duration::days(self.retention_days as i64);

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Cleanup could not read {}: {}", self.root.display(), err);
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(name, DATE_PARTITION_FORMAT) else {
                warn!("Skipping directory with invalid date format: {}", name);
                continue;
            };
            let Some(partition_start) = date.and_hms_opt(0, 0, 0) else {
                continue;
            };
            if partition_start.and_utc() >= cutoff {
                continue;
            }

            self.sweep_partition(&path, name, &mut report);
        }

        report
    }

    fn sweep_partition(&self, path: &Path, name: &str, report: &mut CleanupReport) {
        let children = match fs::read_dir(path) {
            Ok(children) => children,
            Err(err) => {
                warn!("Cleanup could not read {}: {}", path.display(), err);
                return;
            }
        };

        for child in children.flatten() {
            let file = child.path();
            if !file.is_file() {
                continue;
            }
            let size = child.metadata().map(|meta| meta.len()).unwrap_or_default();
            match fs::remove_file(&file) {
                Ok(()) => {
                    report.files_deleted += 1;
                    report.bytes_freed += size;
                    let filename = child.file_name();
                    self.append_log(&format!(
                        "{} deleted {}/{} ({} bytes)",
                        Utc::now().to_rfc3339(),
                        name,
                        filename.to_string_lossy(),
                        size
                    ));
                }
                Err(err) => {
                    report.files_failed += 1;
                    warn!("Failed to delete {}: {}", file.display(), err);
                }
            }
        }

        // Only remove the partition once it is actually empty.
        match fs::remove_dir(path) {
            Ok(()) => report.partitions_removed += 1,
            Err(err) => warn!("Could not remove partition {}: {}", path.display(), err),
        }
    }

    fn append_log(&self, line: &str) {
        let log_path = self.root.join(CLEANUP_LOG_FILE);
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(err) = result {
            warn!("Failed to write cleanup log: {}", err);
        }
    }

    /// Spawns the periodic sweep task.
    pub fn spawn_periodic(self, every: StdDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The immediate first tick is skipped; the startup sweep
            // already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = self.run();
                info!(
                    "Cleanup sweep: {} files deleted, {} failed, {} bytes freed",
                    report.files_deleted, report.files_failed, report.bytes_freed
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(root: &Path, partition: &str, filename: &str, bytes: &[u8]) {
        let dir = root.join(partition);
        fs::create_dir_all(&dir).expect("create partition");
        fs::write(dir.join(filename), bytes).expect("write file");
    }

    #[test]
    fn retention_zero_deletes_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let today = Utc::now().format(DATE_PARTITION_FORMAT).to_string();
        plant(dir.path(), &today, "a.png", b"aaaa");
        plant(dir.path(), "2020-01-01", "b.png", b"bb");

        let report = Cleaner::new(dir.path(), 0).run();
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.bytes_freed, 6);
        assert_eq!(report.partitions_removed, 2);
        assert!(!dir.path().join(&today).exists());
        assert!(!dir.path().join("2020-01-01").exists());
    }

    #[test]
    fn huge_retention_deletes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        plant(dir.path(), "2020-01-01", "a.png", b"aaaa");

        let report = Cleaner::new(dir.path(), 100_000).run();
        assert_eq!(report.files_deleted, 0);
        assert!(dir.path().join("2020-01-01").join("a.png").exists());
    }

    #[test]
    fn only_expired_partitions_are_swept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let today = Utc::now().format(DATE_PARTITION_FORMAT).to_string();
        plant(dir.path(), &today, "fresh.png", b"fresh");
        plant(dir.path(), "2020-01-01", "old.png", b"old");

        let report = Cleaner::new(dir.path(), 7).run();
        assert_eq!(report.files_deleted, 1);
        assert!(dir.path().join(&today).join("fresh.png").exists());
        assert!(!dir.path().join("2020-01-01").exists());
    }

    #[test]
    fn deletions_are_logged_one_line_each() {
        let dir = tempfile::tempdir().expect("tempdir");
        plant(dir.path(), "2020-01-01", "a.png", b"a");
        plant(dir.path(), "2020-01-02", "b.png", b"b");

        Cleaner::new(dir.path(), 0).run();
        let log = fs::read_to_string(dir.path().join(CLEANUP_LOG_FILE)).expect("read log");
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("a.png"));
        assert!(log.contains("b.png"));
    }

    #[test]
    fn non_date_directories_are_left_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        plant(dir.path(), "not-a-date", "keep.png", b"keep");

        let report = Cleaner::new(dir.path(), 0).run();
        assert_eq!(report.files_deleted, 0);
        assert!(dir.path().join("not-a-date").join("keep.png").exists());
    }
}
