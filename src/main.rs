//! Courier daemon.
//!
//! Opens the metrics database, runs the hourly and daily snapshot
//! collectors, applies snapshot retention once a day and keeps the template
//! cache trimmed until interrupted with Ctrl-C.
//!
//! # Environment
//!
//! - `COURIER_DATABASE_URL` - SQLite connection string
//! - `COURIER_HOURLY_INTERVAL_SECS` / `COURIER_DAILY_INTERVAL_SECS` - collection timers
//! - `COURIER_RETENTION_DAYS` - snapshot retention
//! - `COURIER_TEMPLATE_TTL_SECS` - lifetime of cached custom templates
//! - `RUST_LOG` - log filter

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use courier::config::Config;
use courier::events::MetricsEvent;
use courier::metrics::MetricsAggregator;
use courier::scheduler::RepeatingTask;
use courier::storage::Storage;
use courier::templates::TemplateRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("courier=info".parse()?))
        .init();

    let config = Config::from_env();
    info!(
        db_url = %config.database_url,
        retention_days = config.retention_days,
        "Starting Courier"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let aggregator = MetricsAggregator::new(storage.clone(), &config);
    let renderer = TemplateRenderer::new(storage.clone(), config.template_ttl);
    info!(
        cached_templates = renderer.cache().len(),
        "Template catalog loaded"
    );

    let mut events = aggregator.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MetricsEvent::SnapshotCollected {
                    snapshot_id,
                    period,
                }) => debug!(%snapshot_id, %period, "Snapshot event"),
                Ok(MetricsEvent::CollectionFailed { period, error }) => {
                    warn!(%period, %error, "Collection cycle failed")
                }
                Ok(MetricsEvent::MetricsCleaned { deleted }) => {
                    debug!(deleted, "Cleanup event")
                }
                Ok(MetricsEvent::DashboardUpdated { .. }) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let collection = aggregator.start_collection();

    let retention = {
        let aggregator = aggregator.clone();
        RepeatingTask::spawn("metrics-retention", config.daily_interval, move || {
            let aggregator = aggregator.clone();
            async move {
                if let Err(e) = aggregator.apply_retention().await {
                    error!(error = %e, "Retention cleanup failed");
                }
            }
        })
    };

    let cache_sweeper = {
        let renderer = renderer.clone();
        RepeatingTask::spawn("template-cache-sweep", config.template_ttl, move || {
            let renderer = renderer.clone();
            async move {
                let purged = renderer.cache().purge_expired();
                if purged > 0 {
                    debug!(purged, "Expired templates purged");
                }
            }
        })
    };

    info!("Courier is running");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    collection.stop().await;
    retention.stop().await;
    cache_sweeper.stop().await;
    event_logger.abort();
    storage.close().await;

    info!("Courier stopped");
    Ok(())
}
