//! Artifact naming and storage.
//!
//! Generated images land under `<root>/YYYY-MM-DD/` with names of the form
//! `{timestamp}_{hash}.png`. The hash folds in a process-wide sequence
//! counter so identical prompts in the same instant still get distinct
//! names, and the character set can never contain traversal sequences.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Days, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::constants::{DATE_PARTITION_FORMAT, TIMESTAMP_FORMAT};
use crate::error::AppError;

#[allow(clippy::expect_used)] // pattern is static and known-good
static FILENAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*\.(png|jpg|jpeg)$").expect("static pattern"));

static FILENAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// One stored generated image.
#[derive(Clone, Debug)]
pub struct StoredArtifact {
    /// Bare filename, `{timestamp}_{hash}.png`.
    pub filename: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Date partition the file lives in, `YYYY-MM-DD`.
    pub partition: String,
}

/// Aggregate numbers for the artifact root.
#[derive(Debug, Serialize)]
pub struct StorageStats {
    /// Files across all partitions.
    pub total_files: u64,
    /// Bytes across all partitions.
    pub total_bytes: u64,
    /// Per-partition breakdown, oldest first.
    pub partitions: Vec<PartitionStats>,
}

/// Numbers for one date partition.
#[derive(Debug, Serialize)]
pub struct PartitionStats {
    /// Partition date, `YYYY-MM-DD`.
    pub date: String,
    /// Files in the partition.
    pub files: u64,
    /// Bytes in the partition.
    pub bytes: u64,
}

/// Filesystem store for generated images.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    search_days: u64,
}

impl Storage {
    /// Opens (and if needed creates) the artifact root. `search_days` bounds
    /// how far back [`Storage::resolve`] looks for a filename.
    pub fn new(root: &Path, search_days: u64) -> Result<Self, AppError> {
        fs::create_dir_all(root).map_err(|err| {
            AppError::Storage(format!("Could not create {}: {}", root.display(), err))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            search_days,
        })
    }

    /// The artifact root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derives a collision-resistant artifact name from the generation time
    /// and the prompt.
    pub fn create_filename(prompt: &str, now: DateTime<Utc>) -> String {
        let seq = FILENAME_SEQ.fetch_add(1, Ordering::Relaxed);
        let timestamp = now.format(TIMESTAMP_FORMAT);

        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(seq.to_le_bytes());
        let digest = hasher.finalize();
        let mut short = String::with_capacity(8);
        for byte in digest.iter().take(4) {
            let _ = write!(short, "{:02x}", byte);
        }

        format!("{}_{}.png", timestamp, short)
    }

    /// Writes image bytes into today's partition.
    pub fn save(&self, prompt: &str, bytes: &[u8]) -> Result<StoredArtifact, AppError> {
        let now = Utc::now();
        let partition = now.format(DATE_PARTITION_FORMAT).to_string();
        let dir = self.root.join(&partition);
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Storage(format!("Could not create {}: {}", dir.display(), err))
        })?;

        let filename = Self::create_filename(prompt, now);
        let path = dir.join(&filename);
        fs::write(&path, bytes).map_err(|err| {
            AppError::Storage(format!("Could not write {}: {}", path.display(), err))
        })?;

        Ok(StoredArtifact {
            filename,
            path,
            size: bytes.len() as u64,
            partition,
        })
    }

    /// True when a requested name is shaped like something we could have
    /// written: no separators, no `..`, a whitelisted extension.
    pub fn validate_filename(filename: &str) -> bool {
        !filename.contains("..") && FILENAME_PATTERN.is_match(filename)
    }

    /// Finds a stored artifact by bare filename, searching recent date
    /// partitions. Anything resolving outside the root is treated as
    /// missing.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, AppError> {
        if !Self::validate_filename(filename) {
            return Err(AppError::NotFound(filename.to_string()));
        }

        let root = self
            .root
            .canonicalize()
            .map_err(|err| AppError::Storage(format!("Artifact root missing: {}", err)))?;

        let today = Utc::now().date_naive();
        for days_back in 0..=self.search_days {
            let Some(date) = today.checked_sub_days(Days::new(days_back)) else {
                break;
            };
            let partition = date.format(DATE_PARTITION_FORMAT).to_string();
            let candidate = self.root.join(&partition).join(filename);
            if !candidate.is_file() {
                continue;
            }
            let canonical = candidate
                .canonicalize()
                .map_err(|_| AppError::NotFound(filename.to_string()))?;
            if !canonical.starts_with(&root) {
                return Err(AppError::NotFound(filename.to_string()));
            }
            return Ok(canonical);
        }

        Err(AppError::NotFound(filename.to_string()))
    }

    /// Walks the partitions and totals file counts and sizes.
    pub fn stats(&self) -> Result<StorageStats, AppError> {
        let mut partitions = Vec::new();
        let mut total_files = 0u64;
        let mut total_bytes = 0u64;

        let entries = fs::read_dir(&self.root).map_err(|err| {
            AppError::Storage(format!("Could not read {}: {}", self.root.display(), err))
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| AppError::Storage(err.to_string()))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(date) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            let mut files = 0u64;
            let mut bytes = 0u64;
            let children = fs::read_dir(&path).map_err(|err| {
                AppError::Storage(format!("Could not read {}: {}", path.display(), err))
            })?;
            for child in children {
                let child = child.map_err(|err| AppError::Storage(err.to_string()))?;
                if let Ok(metadata) = child.metadata()
                    && metadata.is_file()
                {
                    files += 1;
                    bytes += metadata.len();
                }
            }

            total_files += files;
            total_bytes += bytes;
            partitions.push(PartitionStats {
                date: date.to_string(),
                files,
                bytes,
            });
        }

        partitions.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(StorageStats {
            total_files,
            total_bytes,
            partitions,
        })
    }
}
