use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pixelforge::cleanup::Cleaner;
use pixelforge::config::setup_logging;
use pixelforge::constants::{ARTIFACT_DIR, CLEANUP_INTERVAL_SECONDS};
use pixelforge::generation::{GenerationService, PollinationsModel};
use pixelforge::storage::Storage;
use pixelforge::web::RateLimit;
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = pixelforge::cli::CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        return;
    }

    let artifact_dir = cli.artifact_dir.clone().unwrap_or_else(|| ARTIFACT_DIR.clone());
    let storage = match Storage::new(&artifact_dir, cli.retention_days.max(7) as u64) {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            error!("Failed to open artifact directory: {:?}", err);
            return;
        }
    };

    let cleaner = Cleaner::new(&artifact_dir, cli.retention_days);
    let report = cleaner.run();
    info!(
        "Startup cleanup: {} files deleted, {} bytes freed",
        report.files_deleted, report.bytes_freed
    );
    cleaner.spawn_periodic(Duration::from_secs(CLEANUP_INTERVAL_SECONDS));

    // The model is loaded exactly once here; everything downstream reaches
    // it through the generation service.
    let model = Arc::new(PollinationsModel::new(&cli.model_endpoint));
    let service = Arc::new(GenerationService::new(
        model,
        Duration::from_secs(cli.generation_timeout),
        cli.max_concurrent.get(),
    ));

    let rate_limit = if cli.no_rate_limit {
        None
    } else {
        Some(RateLimit {
            per_minute: cli.rate_limit_per_minute,
            per_hour: cli.rate_limit_per_hour,
        })
    };

    if let Err(err) = pixelforge::web::setup_server(
        &cli.listen_address,
        cli.port,
        service,
        storage,
        rate_limit,
    )
    .await
    {
        error!("Application error: {}", err);
    }
}
