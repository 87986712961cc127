//! SQLite storage layer for Courier.
//!
//! Four tables back the two components:
//!
//! - `notifications`: raw delivery log written by the surrounding application
//! - `recipients`: subscription state per recipient
//! - `metrics_snapshots`: append-only snapshots, body stored as JSON
//! - `templates`: custom notification templates, body stored as JSON
//!
//! Timestamps are stored as Unix nanoseconds, saturating outside the
//! years 1677-2262.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::warn;

use crate::error::Result;
use crate::model::{
    Channel, ChannelStats, Counts, MetricsSnapshot, NotificationRecord, Period, Recipient,
    WindowData,
};
use crate::templates::Template;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        channel TEXT NOT NULL,
        status TEXT NOT NULL,
        error_type TEXT,
        clicked INTEGER NOT NULL DEFAULT 0,
        delivery_ms INTEGER,
        processing_ms INTEGER,
        queue_wait_ms INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_notifications_created_at
    ON notifications(created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recipients (
        user_id TEXT PRIMARY KEY,
        status TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metrics_snapshots (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        period TEXT NOT NULL,
        window_start INTEGER NOT NULL,
        ts INTEGER NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_metrics_snapshots_period_window
    ON metrics_snapshots(period, window_start)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_metrics_snapshots_ts
    ON metrics_snapshots(ts)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS templates (
        template_id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        body TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
];

/// Statuses that count as "sent".
const SENT: &str = "status IN ('sent', 'delivered', 'read')";

/// Statuses that count as "delivered".
const DELIVERED: &str = "status IN ('delivered', 'read')";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:courier.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to ":memory:" opens its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close the pool. Later calls fail with a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ==================== Raw notification data ====================

    /// Append a notification to the raw delivery log.
    pub async fn record_notification(&self, record: &NotificationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, channel, status, error_type, clicked,
                 delivery_ms, processing_ms, queue_wait_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.channel.as_str())
        .bind(record.status.as_str())
        .bind(&record.error_type)
        .bind(record.clicked)
        .bind(record.delivery_time_ms)
        .bind(record.processing_time_ms)
        .bind(record.queue_wait_time_ms)
        .bind(unix_nanos(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a recipient's subscription state.
    pub async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recipients (user_id, status) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET status = excluded.status
            "#,
        )
        .bind(&recipient.user_id)
        .bind(recipient.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count everything a snapshot needs for the window `[start, end)`.
    pub async fn gather_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowData> {
        let (start_ns, end_ns) = (unix_nanos(start), unix_nanos(end));

        let totals = sqlx::query(&format!(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN {SENT} THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN {DELIVERED} THEN 1 ELSE 0 END), 0) AS delivered,
                COALESCE(SUM(CASE WHEN status = 'read' THEN 1 ELSE 0 END), 0) AS read,
                COALESCE(SUM(clicked), 0) AS clicked,
                COUNT(DISTINCT CASE WHEN status = 'read' THEN user_id END) AS engaged,
                COALESCE(AVG(processing_ms), 0.0) AS avg_processing,
                COALESCE(AVG(queue_wait_ms), 0.0) AS avg_queue_wait
            FROM notifications
            WHERE created_at >= ? AND created_at < ?
            "#
        ))
        .bind(start_ns)
        .bind(end_ns)
        .fetch_one(&self.pool)
        .await?;

        let mut data = WindowData {
            counts: Counts {
                total: count(&totals, "total")?,
                sent: count(&totals, "sent")?,
                failed: count(&totals, "failed")?,
                pending: count(&totals, "pending")?,
            },
            delivered: count(&totals, "delivered")?,
            read: count(&totals, "read")?,
            clicked: count(&totals, "clicked")?,
            engaged_users: count(&totals, "engaged")?,
            avg_processing_time_ms: totals.try_get("avg_processing")?,
            avg_queue_wait_time_ms: totals.try_get("avg_queue_wait")?,
            ..WindowData::default()
        };

        let channel_rows = sqlx::query(&format!(
            r#"
            SELECT
                channel,
                SUM(CASE WHEN {SENT} THEN 1 ELSE 0 END) AS sent,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN {DELIVERED} THEN 1 ELSE 0 END) AS delivered,
                SUM(CASE WHEN status = 'read' THEN 1 ELSE 0 END) AS read,
                SUM(clicked) AS clicked,
                COALESCE(AVG(delivery_ms), 0.0) AS avg_delivery
            FROM notifications
            WHERE created_at >= ? AND created_at < ?
            GROUP BY channel
            "#
        ))
        .bind(start_ns)
        .bind(end_ns)
        .fetch_all(&self.pool)
        .await?;

        for row in &channel_rows {
            let name: String = row.try_get("channel")?;
            let Ok(channel) = name.parse::<Channel>() else {
                warn!(channel = %name, "Skipping notifications on unknown channel");
                continue;
            };
            data.channels.insert(
                channel,
                ChannelStats {
                    sent: count(row, "sent")?,
                    failed: count(row, "failed")?,
                    delivered: count(row, "delivered")?,
                    read: count(row, "read")?,
                    clicked: count(row, "clicked")?,
                    avg_delivery_time_ms: row.try_get("avg_delivery")?,
                },
            );
        }

        let error_rows = sqlx::query(
            r#"
            SELECT COALESCE(error_type, 'unknown') AS error_type, COUNT(*) AS n
            FROM notifications
            WHERE status = 'failed' AND created_at >= ? AND created_at < ?
            GROUP BY 1
            "#,
        )
        .bind(start_ns)
        .bind(end_ns)
        .fetch_all(&self.pool)
        .await?;

        data.errors = error_rows
            .iter()
            .map(|row| -> Result<(String, u64)> {
                Ok((row.try_get("error_type")?, count(row, "n")?))
            })
            .collect::<Result<_>>()?;

        let peak = sqlx::query(
            r#"
            SELECT CAST(strftime('%H', created_at / 1000000000, 'unixepoch') AS INTEGER) AS hour,
                   COUNT(*) AS n
            FROM notifications
            WHERE created_at >= ? AND created_at < ?
            GROUP BY hour
            ORDER BY n DESC, hour ASC
            LIMIT 1
            "#,
        )
        .bind(start_ns)
        .bind(end_ns)
        .fetch_optional(&self.pool)
        .await?;

        data.peak_hour = peak
            .map(|row| row.try_get::<i64, _>("hour"))
            .transpose()?
            .and_then(|h| u32::try_from(h).ok());

        let recipient_rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n FROM recipients GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &recipient_rows {
            let status: String = row.try_get("status")?;
            let n = count(row, "n")?;
            match status.as_str() {
                "active" => data.active_users = n,
                "opted_out" => data.opted_out = n,
                "suspended" => data.suspended = n,
                other => warn!(status = %other, "Ignoring recipients with unknown status"),
            }
        }

        Ok(data)
    }

    // ==================== Snapshots ====================

    /// Append a snapshot. Snapshots are never updated afterwards.
    pub async fn insert_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let body = serde_json::to_string(snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO metrics_snapshots (id, period, window_start, ts, body)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(snapshot.period.as_str())
        .bind(unix_nanos(snapshot.window_start))
        .bind(unix_nanos(snapshot.timestamp))
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The most recently built snapshot of any period.
    pub async fn latest_snapshot(&self) -> Result<Option<MetricsSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT body FROM metrics_snapshots
            ORDER BY ts DESC, seq DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_body).transpose()
    }

    /// Snapshots of `period` whose window starts within `[start, end]`,
    /// oldest first. Insertion order breaks timestamp ties.
    pub async fn snapshots_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<Vec<MetricsSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM metrics_snapshots
            WHERE period = ? AND window_start >= ? AND window_start <= ?
            ORDER BY ts ASC, seq ASC
            "#,
        )
        .bind(period.as_str())
        .bind(unix_nanos(start))
        .bind(unix_nanos(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_body).collect()
    }

    /// Delete snapshots built before `cutoff`. Returns the number removed.
    pub async fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM metrics_snapshots WHERE ts < ?
            "#,
        )
        .bind(unix_nanos(cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_snapshots(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM metrics_snapshots")
            .fetch_one(&self.pool)
            .await?;
        count(&row, "n")
    }

    // ==================== Templates ====================

    pub async fn insert_template(&self, template: &Template) -> Result<()> {
        let body = serde_json::to_string(template)?;

        sqlx::query(
            r#"
            INSERT INTO templates (template_id, category, is_active, body, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.template_id)
        .bind(template.category.as_str())
        .bind(template.is_active)
        .bind(body)
        .bind(unix_nanos(template.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a template regardless of its active flag.
    pub async fn find_template(&self, template_id: &str) -> Result<Option<Template>> {
        let row = sqlx::query(
            r#"
            SELECT body FROM templates WHERE template_id = ?
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_body).transpose()
    }

    pub async fn find_active_template(&self, template_id: &str) -> Result<Option<Template>> {
        let row = sqlx::query(
            r#"
            SELECT body FROM templates WHERE template_id = ? AND is_active = 1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_body).transpose()
    }

    /// All active templates in creation order.
    pub async fn list_active_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM templates WHERE is_active = 1 ORDER BY rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_body).collect()
    }

    /// Overwrite a stored template. Returns `false` if it does not exist.
    ///
    /// Concurrent writers race; the last write wins.
    pub async fn replace_template(&self, template: &Template) -> Result<bool> {
        let body = serde_json::to_string(template)?;

        let result = sqlx::query(
            r#"
            UPDATE templates
            SET category = ?, is_active = ?, body = ?, updated_at = ?
            WHERE template_id = ?
            "#,
        )
        .bind(template.category.as_str())
        .bind(template.is_active)
        .bind(body)
        .bind(unix_nanos(template.updated_at))
        .bind(&template.template_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a stored template. Returns `false` if it did not exist.
    pub async fn delete_template(&self, template_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM templates WHERE template_id = ?
            "#,
        )
        .bind(template_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn unix_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(if at.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn count(row: &SqliteRow, column: &str) -> Result<u64> {
    let value: i64 = row.try_get(column)?;
    Ok(value.max(0) as u64)
}

fn decode_body<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::build_snapshot;
    use crate::model::{NotificationStatus, RecipientStatus};
    use chrono::{Duration, TimeZone};

    async fn setup_test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    fn record(
        id: &str,
        channel: Channel,
        status: NotificationStatus,
        at: DateTime<Utc>,
    ) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            user_id: format!("user-{id}"),
            channel,
            status,
            error_type: (status == NotificationStatus::Failed).then(|| "timeout".to_string()),
            clicked: false,
            delivery_time_ms: Some(200),
            processing_time_ms: Some(40),
            queue_wait_time_ms: Some(10),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_gather_window_counts_statuses() {
        let storage = setup_test_storage().await;
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let end = start + Duration::hours(1);

        let statuses = [
            NotificationStatus::Sent,
            NotificationStatus::Delivered,
            NotificationStatus::Read,
            NotificationStatus::Failed,
            NotificationStatus::Pending,
        ];
        for (i, status) in statuses.into_iter().enumerate() {
            let at = start + Duration::minutes(i as i64);
            storage
                .record_notification(&record(&i.to_string(), Channel::Email, status, at))
                .await
                .unwrap();
        }
        // Outside the half-open window
        storage
            .record_notification(&record("late", Channel::Sms, NotificationStatus::Sent, end))
            .await
            .unwrap();

        let data = storage.gather_window(start, end).await.unwrap();

        assert_eq!(data.counts.total, 5);
        assert_eq!(data.counts.sent, 3);
        assert_eq!(data.counts.failed, 1);
        assert_eq!(data.counts.pending, 1);
        assert_eq!(data.delivered, 2);
        assert_eq!(data.read, 1);
        assert_eq!(data.engaged_users, 1);
        assert_eq!(data.errors, vec![("timeout".to_string(), 1)]);
        assert_eq!(data.peak_hour, Some(10));
        assert_eq!(data.channels.len(), 1);
        assert_eq!(data.channels[&Channel::Email].avg_delivery_time_ms, 200.0);
        assert_eq!(data.avg_processing_time_ms, 40.0);
    }

    #[tokio::test]
    async fn test_gather_window_counts_recipients() {
        let storage = setup_test_storage().await;
        for (id, status) in [
            ("a", RecipientStatus::Active),
            ("b", RecipientStatus::Active),
            ("c", RecipientStatus::OptedOut),
            ("d", RecipientStatus::Suspended),
        ] {
            storage
                .upsert_recipient(&Recipient {
                    user_id: id.to_string(),
                    status,
                })
                .await
                .unwrap();
        }
        // Re-subscribing moves a recipient rather than duplicating it
        storage
            .upsert_recipient(&Recipient {
                user_id: "c".to_string(),
                status: RecipientStatus::Active,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let data = storage
            .gather_window(now - Duration::hours(1), now)
            .await
            .unwrap();

        assert_eq!(data.active_users, 3);
        assert_eq!(data.opted_out, 0);
        assert_eq!(data.suspended, 1);
        assert_eq!(data.counts.total, 0);
        assert_eq!(data.peak_hour, None);
    }

    #[tokio::test]
    async fn test_snapshot_range_filters_period_and_window() {
        let storage = setup_test_storage().await;
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        for hour in 0..4 {
            let start = base + Duration::hours(hour);
            let snapshot = build_snapshot(
                WindowData::default(),
                Period::Hourly,
                start,
                start + Duration::hours(1),
                start + Duration::hours(1),
            );
            storage.insert_snapshot(&snapshot).await.unwrap();
        }
        let daily = build_snapshot(
            WindowData::default(),
            Period::Daily,
            base,
            base + Duration::days(1),
            base + Duration::days(1),
        );
        storage.insert_snapshot(&daily).await.unwrap();

        let hourly = storage
            .snapshots_in_range(
                base + Duration::hours(1),
                base + Duration::hours(2),
                Period::Hourly,
            )
            .await
            .unwrap();

        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].window_start, base + Duration::hours(1));
        assert_eq!(hourly[1].window_start, base + Duration::hours(2));

        let daily_only = storage
            .snapshots_in_range(base, base + Duration::days(1), Period::Daily)
            .await
            .unwrap();
        assert_eq!(daily_only, vec![daily.clone()]);

        let latest = storage.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.id, daily.id);
    }

    #[tokio::test]
    async fn test_delete_snapshots_before() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        for age_days in [100, 95, 10] {
            let at = now - Duration::days(age_days);
            let snapshot = build_snapshot(WindowData::default(), Period::Daily, at, at, at);
            storage.insert_snapshot(&snapshot).await.unwrap();
        }

        let cutoff = now - Duration::days(90);
        assert_eq!(storage.delete_snapshots_before(cutoff).await.unwrap(), 2);
        assert_eq!(storage.delete_snapshots_before(cutoff).await.unwrap(), 0);
        assert_eq!(storage.count_snapshots().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_bounds_are_exact_below_a_millisecond() {
        let storage = setup_test_storage().await;
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let start = base + Duration::microseconds(900);
        let snapshot = build_snapshot(WindowData::default(), Period::Hourly, start, start, start);
        storage.insert_snapshot(&snapshot).await.unwrap();

        let before = storage
            .snapshots_in_range(base, base + Duration::microseconds(100), Period::Hourly)
            .await
            .unwrap();
        assert!(before.is_empty());

        let exact = storage
            .snapshots_in_range(start, start, Period::Hourly)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);

        let after = storage
            .snapshots_in_range(
                start + Duration::nanoseconds(1),
                base + Duration::seconds(1),
                Period::Hourly,
            )
            .await
            .unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cutoff_is_exact_below_a_millisecond() {
        let storage = setup_test_storage().await;
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let built = base + Duration::microseconds(100);
        let snapshot = build_snapshot(WindowData::default(), Period::Daily, base, base, built);
        storage.insert_snapshot(&snapshot).await.unwrap();

        assert_eq!(storage.delete_snapshots_before(built).await.unwrap(), 0);
        let cutoff = base + Duration::microseconds(900);
        assert_eq!(storage.delete_snapshots_before(cutoff).await.unwrap(), 1);
    }

    #[test]
    fn test_unix_nanos_saturates() {
        assert_eq!(unix_nanos(DateTime::<Utc>::MIN_UTC), i64::MIN);
        assert_eq!(unix_nanos(DateTime::<Utc>::MAX_UTC), i64::MAX);
        assert_eq!(unix_nanos(DateTime::<Utc>::UNIX_EPOCH), 0);
    }

    #[tokio::test]
    async fn test_no_snapshot_yet() {
        let storage = setup_test_storage().await;
        assert!(storage.latest_snapshot().await.unwrap().is_none());
    }
}
