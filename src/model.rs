//! Data models for notification metrics.
//!
//! A [`MetricsSnapshot`] is one immutable, timestamped record of aggregated
//! notification statistics for a fixed window. Snapshots are append-only:
//! they are built once by the aggregator, persisted, and afterwards only
//! read by range queries or deleted by retention cleanup.
//!
//! Raw inputs ([`NotificationRecord`], [`Recipient`]) are written by the
//! surrounding application; the aggregator only ever counts them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Aggregation granularity of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Realtime,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Realtime => "realtime",
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    /// Length of the window a snapshot of this period summarizes.
    ///
    /// Realtime snapshots cover the trailing hour.
    pub fn window(&self) -> chrono::Duration {
        match self {
            Period::Realtime | Period::Hourly => chrono::Duration::hours(1),
            Period::Daily => chrono::Duration::days(1),
            Period::Weekly => chrono::Duration::weeks(1),
            Period::Monthly => chrono::Duration::days(30),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realtime" => Ok(Period::Realtime),
            "hourly" => Ok(Period::Hourly),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(Error::Validation(format!("unknown period '{other}'"))),
        }
    }
}

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
    InApp,
    Push,
    Dashboard,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Email,
        Channel::Sms,
        Channel::Whatsapp,
        Channel::InApp,
        Channel::Push,
        Channel::Dashboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
            Channel::InApp => "inApp",
            Channel::Push => "push",
            Channel::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown channel '{s}'")))
    }
}

/// Lifecycle state of a single notification in the raw log.
///
/// `Delivered` and `Read` imply the notification was sent; `Read` implies
/// it was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }
}

/// Subscription state of a notification recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Active,
    OptedOut,
    Suspended,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Active => "active",
            RecipientStatus::OptedOut => "opted_out",
            RecipientStatus::Suspended => "suspended",
        }
    }
}

/// One notification as recorded by the delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,

    /// Recipient the notification was addressed to.
    pub user_id: String,

    pub channel: Channel,

    pub status: NotificationStatus,

    /// Error classification for failed deliveries (e.g. "timeout").
    pub error_type: Option<String>,

    /// Whether the recipient followed the notification's action.
    pub clicked: bool,

    /// Time from dispatch to provider acknowledgement, in milliseconds.
    pub delivery_time_ms: Option<i64>,

    /// Time spent rendering and dispatching, in milliseconds.
    pub processing_time_ms: Option<i64>,

    /// Time spent waiting in the outbound queue, in milliseconds.
    pub queue_wait_time_ms: Option<i64>,

    pub created_at: DateTime<Utc>,
}

/// A notification recipient and their subscription state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub user_id: String,
    pub status: RecipientStatus,
}

/// Raw notification counters for a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub pending: u64,
}

impl Counts {
    /// Whether `sent + failed + pending <= total` holds.
    ///
    /// Advisory only: upstream writers may race with the counting queries.
    pub fn is_consistent(&self) -> bool {
        self.sent + self.failed + self.pending <= self.total
    }
}

/// Per-channel counters for a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub sent: u64,
    pub failed: u64,
    pub delivered: u64,
    pub read: u64,
    /// Opened/clicked notifications.
    pub clicked: u64,
    /// Average delivery latency in milliseconds (0 when unknown).
    pub avg_delivery_time_ms: f64,
}

/// Derived percentages, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rates {
    pub success_rate: f64,
    pub delivery_rate: f64,
    pub read_rate: f64,
    pub click_rate: f64,
}

/// One ranked error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub error_type: String,
    pub count: u64,
    /// Share of all errors in the window.
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total_errors: u64,
    pub by_type: BTreeMap<String, u64>,
    pub top_errors: Vec<ErrorEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub active_users: u64,
    pub opted_out: u64,
    pub suspended: u64,
    /// Share of active users who read at least one notification in the window.
    pub engagement_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub avg_processing_time_ms: f64,
    pub avg_queue_wait_time_ms: f64,
    /// UTC hour with the most notifications, formatted "HH:00".
    pub peak_time: Option<String>,
    /// Channel with the slowest average delivery.
    pub bottleneck: Option<Channel>,
}

/// One aggregation window's notification statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub id: String,
    /// When the snapshot was built.
    pub timestamp: DateTime<Utc>,
    pub period: Period,
    /// Inclusive start of the summarized window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the summarized window.
    pub window_end: DateTime<Utc>,
    pub counts: Counts,
    pub channel_stats: BTreeMap<Channel, ChannelStats>,
    pub rates: Rates,
    pub errors: ErrorStats,
    pub user_stats: UserStats,
    pub performance: PerformanceStats,
}

impl MetricsSnapshot {
    /// A zeroed realtime snapshot, used when nothing has been collected yet.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            period: Period::Realtime,
            window_start: now,
            window_end: now,
            counts: Counts::default(),
            channel_stats: BTreeMap::new(),
            rates: Rates::default(),
            errors: ErrorStats::default(),
            user_stats: UserStats::default(),
            performance: PerformanceStats::default(),
        }
    }
}

/// Everything the storage layer counts for one window.
///
/// This is the raw input to snapshot construction; no rates are derived yet.
#[derive(Debug, Clone, Default)]
pub struct WindowData {
    pub counts: Counts,
    pub delivered: u64,
    pub read: u64,
    pub clicked: u64,
    pub channels: BTreeMap<Channel, ChannelStats>,
    /// Failed notifications grouped by error type.
    pub errors: Vec<(String, u64)>,
    pub active_users: u64,
    pub opted_out: u64,
    pub suspended: u64,
    /// Distinct recipients with at least one read notification.
    pub engaged_users: u64,
    pub avg_processing_time_ms: f64,
    pub avg_queue_wait_time_ms: f64,
    /// UTC hour of day (0-23) with the most notifications.
    pub peak_hour: Option<u32>,
}

/// Headline rates derived from the current snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub delivery_rate: f64,
    pub success_rate: f64,
    pub read_rate: f64,
    pub click_rate: f64,
    pub engagement_rate: f64,
    pub opt_out_rate: f64,
}

/// Direction of change between the first and last snapshot of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub snapshot_count: usize,
    pub total_notifications: u64,
    pub sent: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub delivery_rate: f64,
}

/// A channel's counters folded over a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAggregate {
    pub sent: u64,
    pub failed: u64,
    pub avg_delivery_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub volume: Trend,
    /// Relative change of total notifications, in percent.
    pub volume_change: f64,
    pub success_rate: Trend,
    /// Relative change of the success rate, in percent.
    pub success_rate_change: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInsights {
    pub avg_active_users: f64,
    pub avg_opted_out: f64,
    pub avg_engagement_rate: f64,
}

/// A snapshot whose volume sits far outside the range's norm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub snapshot_id: String,
    pub window_start: DateTime<Utc>,
    pub total: u64,
    /// Mean total over the range.
    pub expected: f64,
    /// Distance from the mean in standard deviations.
    pub deviation: f64,
}

/// Multi-metric report over a range of snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensiveReport {
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub channels: BTreeMap<Channel, ChannelAggregate>,
    pub trends: TrendSummary,
    /// Each snapshot's top errors concatenated in range order, capped at 10.
    ///
    /// Not re-ranked across snapshots: an error type frequent in many
    /// windows but never on top of one may be missing.
    pub top_errors: Vec<ErrorEntry>,
    pub user_insights: UserInsights,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReport {
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub snapshot_count: usize,
    pub channels: BTreeMap<Channel, ChannelAggregate>,
    pub best_channel: Option<Channel>,
    pub worst_channel: Option<Channel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEngagementReport {
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub snapshot_count: usize,
    pub avg_active_users: f64,
    pub avg_opted_out: f64,
    pub avg_suspended: f64,
    pub avg_engagement_rate: f64,
    pub opt_out_rate: f64,
    pub engagement_trend: Trend,
}
