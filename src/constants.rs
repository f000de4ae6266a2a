//! Shared constants/setters for things
//!

use std::path::PathBuf;
use std::sync::LazyLock;

/// The default place we put generated images
pub static ARTIFACT_DIR: LazyLock<PathBuf> = LazyLock::new(|| PathBuf::from("./generated_images"));

/// Directory served under `/static`
pub const STATIC_DIR: &str = "./static";

/// Longest prompt we accept, in characters.
pub const PROMPT_MAX_CHARS: usize = 500;

/// Dimension used when the request omits width/height.
pub const DEFAULT_DIMENSION: u32 = 1024;

/// Smallest accepted image dimension, in pixels.
pub const MIN_DIMENSION: u32 = 256;

/// Largest accepted image dimension, in pixels.
pub const MAX_DIMENSION: u32 = 2048;

/// Widest accepted aspect ratio (long side over short side).
pub const MAX_ASPECT_RATIO: f64 = 4.0;

/// Fewest accepted inference steps.
pub const MIN_STEPS: i64 = 1;

/// Most accepted inference steps.
pub const MAX_STEPS: i64 = 100;

/// Lowest accepted guidance scale.
pub const MIN_GUIDANCE_SCALE: f64 = 1.0;

/// Highest accepted guidance scale.
pub const MAX_GUIDANCE_SCALE: f64 = 20.0;

/// Timestamp prefix for artifact filenames, millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Directory name format for date partitions under the artifact root.
pub const DATE_PARTITION_FORMAT: &str = "%Y-%m-%d";

/// Name of the deletion log kept in the artifact root.
pub const CLEANUP_LOG_FILE: &str = "cleanup.log";

/// Seconds between retention sweeps.
pub const CLEANUP_INTERVAL_SECONDS: u64 = 60 * 60 * 24;

/// Max age (in seconds) for download cache entries.
pub const DOWNLOAD_CACHE_MAX_AGE_SECONDS: u64 = 60 * 60;

/// Shared cache max age (in seconds) for download cache entries.
pub const DOWNLOAD_CACHE_S_MAXAGE_SECONDS: u64 = 60 * 60 * 24;

/// Cache-Control value for artifact download responses.
pub static DOWNLOAD_CACHE_CONTROL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "public, max-age={}, s-maxage={}",
        DOWNLOAD_CACHE_MAX_AGE_SECONDS, DOWNLOAD_CACHE_S_MAXAGE_SECONDS
    )
});
