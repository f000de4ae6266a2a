//! CLI parser
use clap::Parser;
use std::num::{NonZeroU16, NonZeroUsize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "PIXELFORGE_DEBUG")]
    /// Enable debug logging. Env: PIXELFORGE_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "8000", env = "PIXELFORGE_PORT")]
    /// http listener, defaults to `8000`.
    /// Env: PIXELFORGE_PORT
    pub port: NonZeroU16,
    #[clap(
        long,
        short,
        default_value = "127.0.0.1",
        env = "PIXELFORGE_LISTEN_ADDRESS"
    )]
    /// Listen address, defaults to `127.0.0.1`.
    /// Env: PIXELFORGE_LISTEN_ADDRESS
    pub listen_address: String,

    #[clap(long, short, env = "PIXELFORGE_ARTIFACT_DIR")]
    /// Directory generated images are written to, eg `/data/generated_images`.
    /// Env: PIXELFORGE_ARTIFACT_DIR
    pub artifact_dir: Option<PathBuf>,

    #[clap(long, default_value = "30", env = "PIXELFORGE_RETENTION_DAYS")]
    /// Days a generated image is kept before the cleanup sweep removes it.
    /// Env: PIXELFORGE_RETENTION_DAYS
    pub retention_days: u32,

    #[clap(long, default_value = "120", env = "PIXELFORGE_GENERATION_TIMEOUT")]
    /// Per-request deadline for the model call, in seconds.
    /// Env: PIXELFORGE_GENERATION_TIMEOUT
    pub generation_timeout: u64,

    #[clap(long, default_value = "5", env = "PIXELFORGE_MAX_CONCURRENT")]
    /// Generations allowed to run at once; the rest queue.
    /// Env: PIXELFORGE_MAX_CONCURRENT
    pub max_concurrent: NonZeroUsize,

    #[clap(
        long,
        default_value = "https://image.pollinations.ai/prompt",
        env = "PIXELFORGE_MODEL_ENDPOINT"
    )]
    /// Base URL of the image model endpoint.
    /// Env: PIXELFORGE_MODEL_ENDPOINT
    pub model_endpoint: String,

    #[clap(long, default_value = "10", env = "PIXELFORGE_RATE_LIMIT_PER_MINUTE")]
    /// Generate requests allowed per client per minute.
    /// Env: PIXELFORGE_RATE_LIMIT_PER_MINUTE
    pub rate_limit_per_minute: u32,

    #[clap(long, default_value = "100", env = "PIXELFORGE_RATE_LIMIT_PER_HOUR")]
    /// Generate requests allowed per client per hour.
    /// Env: PIXELFORGE_RATE_LIMIT_PER_HOUR
    pub rate_limit_per_hour: u32,

    #[clap(long, env = "PIXELFORGE_NO_RATE_LIMIT")]
    /// Disable rate limiting entirely.
    /// Env: PIXELFORGE_NO_RATE_LIMIT
    pub no_rate_limit: bool,
}
