//! Integration tests for metrics collection and reporting.
//!
//! These tests drive the aggregator end to end: raw notifications go into
//! storage, snapshots come out, and reports are folded from them.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::time::timeout;
use tokio_test::assert_ok;

use courier::config::Config;
use courier::error::Error;
use courier::events::MetricsEvent;
use courier::metrics::MetricsAggregator;
use courier::model::{
    Channel, NotificationRecord, NotificationStatus, Period, Recipient, RecipientStatus, Trend,
};
use courier::storage::Storage;

async fn create_test_aggregator(config: Config) -> (MetricsAggregator, Storage) {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    let aggregator = MetricsAggregator::new(storage.clone(), &config);
    (aggregator, storage)
}

async fn record(
    storage: &Storage,
    id: String,
    channel: Channel,
    status: NotificationStatus,
    at: DateTime<Utc>,
) {
    let notification = NotificationRecord {
        user_id: format!("user-{}", id.len() % 7),
        id,
        channel,
        status,
        error_type: (status == NotificationStatus::Failed).then(|| "provider_timeout".to_string()),
        clicked: false,
        delivery_time_ms: Some(250),
        processing_time_ms: Some(30),
        queue_wait_time_ms: Some(5),
        created_at: at,
    };
    storage.record_notification(&notification).await.unwrap();
}

/// Record `sent` successful and `failed` failed notifications inside the hour starting at `hour`.
async fn fill_hour(storage: &Storage, hour: DateTime<Utc>, sent: usize, failed: usize) {
    let tag = hour.timestamp();
    for i in 0..sent {
        let at = hour + ChronoDuration::seconds(i as i64 % 3600);
        record(storage, format!("{tag}-s{i}"), Channel::Email, NotificationStatus::Sent, at).await;
    }
    for i in 0..failed {
        let at = hour + ChronoDuration::seconds(i as i64 % 3600);
        record(storage, format!("{tag}-f{i}"), Channel::Sms, NotificationStatus::Failed, at).await;
    }
}

#[tokio::test]
async fn test_hourly_snapshot_to_kpis() {
    let (aggregator, storage) = create_test_aggregator(Config::default()).await;
    let hour = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    fill_hour(&storage, hour, 95, 5).await;

    let snapshot = aggregator
        .collect_snapshot(hour, hour + ChronoDuration::hours(1), Period::Hourly)
        .await
        .unwrap();

    assert_eq!(snapshot.counts.total, 100);
    assert_eq!(snapshot.counts.sent, 95);
    assert_eq!(snapshot.counts.failed, 5);
    assert_eq!(snapshot.counts.pending, 0);
    assert_eq!(snapshot.errors.total_errors, 5);
    assert_eq!(snapshot.errors.top_errors[0].error_type, "provider_timeout");

    let kpis = aggregator.get_kpis().await.unwrap();
    assert_eq!(kpis.success_rate, 95.0);
}

#[tokio::test]
async fn test_range_query_filters_and_orders() {
    let (aggregator, storage) = create_test_aggregator(Config::default()).await;
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

    for h in 0..5 {
        let start = base + ChronoDuration::hours(h);
        fill_hour(&storage, start, 10, 0).await;
        aggregator
            .collect_snapshot(start, start + ChronoDuration::hours(1), Period::Hourly)
            .await
            .unwrap();
    }
    aggregator
        .collect_snapshot(base, base + ChronoDuration::days(1), Period::Daily)
        .await
        .unwrap();

    let range = aggregator
        .get_metrics_range(
            base + ChronoDuration::hours(1),
            base + ChronoDuration::hours(3),
            Period::Hourly,
        )
        .await
        .unwrap();

    assert_eq!(range.len(), 3);
    assert!(range.iter().all(|s| s.period == Period::Hourly));
    assert!(range.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(range.iter().all(|s| {
        s.window_start >= base + ChronoDuration::hours(1)
            && s.window_start <= base + ChronoDuration::hours(3)
    }));

    let empty = aggregator
        .get_metrics_range(
            base - ChronoDuration::days(2),
            base - ChronoDuration::days(1),
            Period::Hourly,
        )
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_comprehensive_report_over_hours() {
    let (aggregator, storage) = create_test_aggregator(Config::default()).await;
    let base = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();

    let volumes = [(40, 10), (60, 0), (90, 10)];
    for (h, (sent, failed)) in volumes.into_iter().enumerate() {
        let start = base + ChronoDuration::hours(h as i64);
        fill_hour(&storage, start, sent, failed).await;
        aggregator
            .collect_snapshot(start, start + ChronoDuration::hours(1), Period::Hourly)
            .await
            .unwrap();
    }

    let report = aggregator
        .generate_comprehensive_report(base, base + ChronoDuration::hours(2))
        .await
        .unwrap();

    assert_eq!(report.summary.snapshot_count, 3);
    assert_eq!(report.summary.total_notifications, 50 + 60 + 100);
    assert_eq!(report.summary.sent, 190);
    assert_eq!(report.summary.failed, 20);
    assert_eq!(report.trends.volume, Trend::Increasing);
    assert_eq!(report.channels[&Channel::Email].sent, 190);
    assert_eq!(report.channels[&Channel::Sms].failed, 20);
    assert_eq!(report.top_errors.len(), 2);

    let empty = aggregator
        .generate_comprehensive_report(
            base - ChronoDuration::days(3),
            base - ChronoDuration::days(2),
        )
        .await;
    assert!(matches!(empty, Err(Error::NoData)));
}

#[tokio::test]
async fn test_channel_and_engagement_reports() {
    let (aggregator, storage) = create_test_aggregator(Config::default()).await;
    let start = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();

    for (user_id, status) in [
        ("user-1", RecipientStatus::Active),
        ("user-2", RecipientStatus::Active),
        ("user-3", RecipientStatus::Active),
        ("user-4", RecipientStatus::OptedOut),
    ] {
        storage
            .upsert_recipient(&Recipient {
                user_id: user_id.to_string(),
                status,
            })
            .await
            .unwrap();
    }
    fill_hour(&storage, start, 20, 4).await;

    aggregator
        .collect_snapshot(start, start + ChronoDuration::hours(1), Period::Hourly)
        .await
        .unwrap();

    let channels = aggregator
        .get_channel_report(start, start, Period::Hourly)
        .await
        .unwrap();
    assert_eq!(channels.best_channel, Some(Channel::Email));
    assert_eq!(channels.channels[&Channel::Sms].sent, 0);

    let engagement = aggregator
        .get_user_engagement_report(start, start, Period::Hourly)
        .await
        .unwrap();
    assert_eq!(engagement.snapshot_count, 1);
    assert_eq!(engagement.avg_active_users, 3.0);
    assert_eq!(engagement.opt_out_rate, 25.0);

    let kpis = aggregator.get_kpis().await.unwrap();
    assert_eq!(kpis.opt_out_rate, 25.0);
}

#[tokio::test]
async fn test_cleanup_twice_deletes_nothing_more() {
    let (aggregator, _) = create_test_aggregator(Config::default()).await;
    let now = Utc::now();

    assert_ok!(
        aggregator
            .collect_snapshot(now - ChronoDuration::hours(1), now, Period::Hourly)
            .await
    );

    let first = aggregator.clean_old_metrics(90).await.unwrap();
    let second = aggregator.clean_old_metrics(90).await.unwrap();

    assert_eq!(first, 0);
    assert_eq!(second, 0);
    assert_eq!(aggregator.get_current_metrics().await.unwrap().period, Period::Hourly);
}

#[tokio::test]
async fn test_scheduled_collection_produces_snapshots() {
    let config = Config {
        hourly_interval: Duration::from_millis(50),
        daily_interval: Duration::from_secs(3600),
        ..Config::default()
    };
    let (aggregator, storage) = create_test_aggregator(config).await;
    let mut events = aggregator.subscribe();

    fill_hour(&storage, Utc::now() - ChronoDuration::minutes(10), 3, 1).await;

    let handle = aggregator.start_collection();

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("collection event in time")
            .unwrap();
        match event {
            MetricsEvent::SnapshotCollected { period, .. } => assert_eq!(period, Period::Hourly),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    handle.stop().await;

    let current = aggregator.get_current_metrics().await.unwrap();
    assert_eq!(current.period, Period::Hourly);
    assert_eq!(current.counts.total, 4);
}

#[tokio::test]
async fn test_failed_cycles_do_not_stop_collection() {
    let config = Config {
        hourly_interval: Duration::from_millis(20),
        daily_interval: Duration::from_secs(3600),
        ..Config::default()
    };
    let (aggregator, storage) = create_test_aggregator(config).await;
    let mut events = aggregator.subscribe();
    storage.close().await;

    let handle = aggregator.start_collection();

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("failure event in time")
            .unwrap();
        assert!(matches!(event, MetricsEvent::CollectionFailed { .. }));
    }

    handle.stop().await;
}
