use std::process::ExitCode;

use album_sync::{CatalogConfig, CatalogController, LoadOutcome, SysfsMonitor};
use tracing_subscriber::EnvFilter;

/// Headless session: open the cache, pull the first page, report, dispose.
///
/// Configuration comes from `ALBUM_SYNC_*` environment variables and log
/// verbosity from `RUST_LOG`.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("album_sync=info")),
        )
        .init();

    let config = CatalogConfig::from_env();
    let monitor = SysfsMonitor::spawn(SysfsMonitor::DEFAULT_ROOT, config.monitor_poll_interval);

    // The session cannot do anything useful without its cache
    let controller = match CatalogController::open(&config, monitor).await {
        Ok(controller) => controller,
        Err(err) => {
            tracing::error!(
                error = %err,
                path = %config.db_path.display(),
                "failed to start catalog session"
            );
            return ExitCode::FAILURE;
        }
    };

    let status = match controller.load_next_page().await {
        Ok(LoadOutcome::Loaded(summary)) => {
            tracing::info!(
                page = summary.page,
                photos = summary.count,
                live = summary.provenance.is_live(),
                favorites = controller.favorites().len(),
                "📊 first page ready"
            );
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            tracing::info!(?outcome, "nothing loaded");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "first page failed");
            ExitCode::FAILURE
        }
    };

    controller.dispose();
    status
}
