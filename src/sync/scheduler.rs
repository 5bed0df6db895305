use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::fieldclimate::StationApi;
use crate::sync::worker::{self, Outcome};

/// Run a full collection every `interval_minutes`, starting immediately,
/// until `shutdown` is cancelled.
///
/// A run in progress is finished before the scheduler stops; every batch it
/// commits is atomic, so stopping between runs never leaves partial writes.
pub async fn run_scheduler(
    db: DatabaseConnection,
    api: Arc<dyn StationApi>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(config.interval_minutes.saturating_mul(60));
    run_every(period, db, api, config, shutdown).await;
}

/// [`run_scheduler`] with an explicit period.
pub async fn run_every(
    period: Duration,
    db: DatabaseConnection,
    api: Arc<dyn StationApi>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    tracing::info!(
        period_secs = period.as_secs(),
        stations = config.stations.len(),
        "Starting collection scheduler"
    );

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Cancellation wins over a tick that is ready at the same time.
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match worker::run_all(&db, api.as_ref(), &config).await {
            Ok(summary) => {
                if summary.has_failures() {
                    tracing::warn!(
                        failed = summary.count(Outcome::Failed),
                        "Scheduled run finished with failed stations"
                    );
                } else {
                    tracing::debug!(stored = summary.measurements_stored(), "Scheduled run finished");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled run failed");
            }
        }
    }

    tracing::info!("Collection scheduler stopped");
}
