//! Time-windowed notification metrics.
//!
//! [`MetricsAggregator`] is the only producer of snapshots. Scheduled
//! collection runs on two repeating tasks (hourly and daily); each cycle
//! counts the window ending "now", persists the snapshot and publishes a
//! [`MetricsEvent`]. Reports are pure folds over range queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::aggregation::{
    build_channel_report, build_comprehensive_report, build_engagement_report, build_snapshot,
    derive_kpis,
};
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventBus, MetricsEvent};
use crate::model::{
    ChannelReport, ComprehensiveReport, Kpis, MetricsSnapshot, Period, UserEngagementReport,
};
use crate::scheduler::RepeatingTask;
use crate::storage::Storage;

/// Produces, persists and queries notification metrics snapshots.
///
/// Cloning is cheap; clones share storage and subscribers.
#[derive(Clone)]
pub struct MetricsAggregator {
    storage: Storage,
    events: EventBus,
    hourly_interval: Duration,
    daily_interval: Duration,
    retention_days: u32,
}

/// Handle to the running hourly and daily collectors.
pub struct CollectionHandle {
    hourly: RepeatingTask,
    daily: RepeatingTask,
}

impl CollectionHandle {
    /// Stop both collectors, letting an in-flight cycle finish.
    pub async fn stop(self) {
        self.hourly.stop().await;
        self.daily.stop().await;
        info!("Metrics collection stopped");
    }
}

impl MetricsAggregator {
    pub fn new(storage: Storage, config: &Config) -> Self {
        Self {
            storage,
            events: EventBus::new(),
            hourly_interval: config.hourly_interval,
            daily_interval: config.daily_interval,
            retention_days: config.retention_days,
        }
    }

    /// Receive snapshot, failure, cleanup and dashboard events.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.events.subscribe()
    }

    /// Start the hourly and daily collectors.
    ///
    /// A failing cycle is logged and published as
    /// [`MetricsEvent::CollectionFailed`]; later cycles still run.
    pub fn start_collection(&self) -> CollectionHandle {
        info!(
            hourly_secs = self.hourly_interval.as_secs_f64(),
            daily_secs = self.daily_interval.as_secs_f64(),
            "Starting metrics collection"
        );

        CollectionHandle {
            hourly: self.spawn_collector(Period::Hourly, self.hourly_interval),
            daily: self.spawn_collector(Period::Daily, self.daily_interval),
        }
    }

    fn spawn_collector(&self, period: Period, every: Duration) -> RepeatingTask {
        let aggregator = self.clone();
        RepeatingTask::spawn(format!("{period}-metrics"), every, move || {
            let aggregator = aggregator.clone();
            async move { aggregator.run_collection_cycle(period).await }
        })
    }

    /// Collect one snapshot for the window of `period` ending now.
    ///
    /// Never returns an error: failures are logged and published instead.
    pub async fn run_collection_cycle(&self, period: Period) {
        let end = Utc::now();
        let start = end - period.window();

        if let Err(e) = self.collect_snapshot(start, end, period).await {
            error!(period = %period, error = %e, "Metrics collection failed");
            self.events.publish(MetricsEvent::CollectionFailed {
                period,
                error: e.to_string(),
            });
        }
    }

    /// Count raw data for `[window_start, window_end)`, then build and persist a snapshot.
    #[instrument(skip(self))]
    pub async fn collect_snapshot(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        period: Period,
    ) -> Result<MetricsSnapshot> {
        let data = self.storage.gather_window(window_start, window_end).await?;

        if !data.counts.is_consistent() {
            warn!(
                total = data.counts.total,
                sent = data.counts.sent,
                failed = data.counts.failed,
                pending = data.counts.pending,
                "Status counts exceed total"
            );
        }

        let snapshot = build_snapshot(data, period, window_start, window_end, Utc::now());
        self.storage.insert_snapshot(&snapshot).await?;

        info!(
            snapshot_id = %snapshot.id,
            period = %period,
            total = snapshot.counts.total,
            success_rate = snapshot.rates.success_rate,
            "Snapshot collected"
        );

        self.events.publish(MetricsEvent::SnapshotCollected {
            snapshot_id: snapshot.id.clone(),
            period,
        });

        Ok(snapshot)
    }

    /// The latest persisted snapshot, or a zeroed one if none exists.
    pub async fn get_current_metrics(&self) -> Result<MetricsSnapshot> {
        Ok(self
            .storage
            .latest_snapshot()
            .await?
            .unwrap_or_else(|| MetricsSnapshot::empty(Utc::now())))
    }

    /// Figures for the trailing hour, built on demand and not persisted.
    pub async fn get_realtime_metrics(&self) -> Result<MetricsSnapshot> {
        let end = Utc::now();
        let start = end - Period::Realtime.window();

        let data = self.storage.gather_window(start, end).await?;
        let snapshot = build_snapshot(data, Period::Realtime, start, end, end);

        self.events.publish(MetricsEvent::DashboardUpdated {
            snapshot: Box::new(snapshot.clone()),
        });

        Ok(snapshot)
    }

    /// Snapshots of `period` whose window starts in `[start, end]`, oldest first.
    pub async fn get_metrics_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<Vec<MetricsSnapshot>> {
        self.storage.snapshots_in_range(start, end, period).await
    }

    pub async fn get_kpis(&self) -> Result<Kpis> {
        let current = self.get_current_metrics().await?;
        Ok(derive_kpis(&current))
    }

    /// Comprehensive report over hourly snapshots.
    ///
    /// Fails with [`crate::error::Error::NoData`] when the range is empty.
    pub async fn generate_comprehensive_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ComprehensiveReport> {
        self.generate_report_for_period(start, end, Period::Hourly).await
    }

    #[instrument(skip(self))]
    pub async fn generate_report_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<ComprehensiveReport> {
        let snapshots = self.get_metrics_range(start, end, period).await?;
        let report = build_comprehensive_report(&snapshots, period, start, end, Utc::now())?;

        info!(
            snapshots = report.summary.snapshot_count,
            total = report.summary.total_notifications,
            anomalies = report.anomalies.len(),
            "Report generated"
        );
        Ok(report)
    }

    pub async fn get_channel_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<ChannelReport> {
        let snapshots = self.get_metrics_range(start, end, period).await?;
        Ok(build_channel_report(&snapshots, period, start, end))
    }

    pub async fn get_user_engagement_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<UserEngagementReport> {
        let snapshots = self.get_metrics_range(start, end, period).await?;
        Ok(build_engagement_report(&snapshots, period, start, end))
    }

    /// Delete snapshots older than `days_to_keep` days. Returns the number deleted.
    #[instrument(skip(self))]
    pub async fn clean_old_metrics(&self, days_to_keep: u32) -> Result<u64> {
        // A retention longer than the calendar reaches keeps everything
        let cutoff = chrono::Duration::try_days(i64::from(days_to_keep))
            .and_then(|keep| Utc::now().checked_sub_signed(keep))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.storage.delete_snapshots_before(cutoff).await?;

        info!(deleted, cutoff = %cutoff, "Old metrics cleaned");
        self.events.publish(MetricsEvent::MetricsCleaned { deleted });

        Ok(deleted)
    }

    /// [`Self::clean_old_metrics`] with the configured retention.
    pub async fn apply_retention(&self) -> Result<u64> {
        self.clean_old_metrics(self.retention_days).await
    }
}
