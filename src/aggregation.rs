//! Aggregation logic for building snapshots and folding snapshot ranges.
//!
//! Everything here is pure: the storage layer hands over raw window counts
//! or a list of snapshots, and these functions derive rates, rankings,
//! trends and reports without further I/O.
//!
//! Range folds use plain sums and averages with no weighting by window
//! size. Callers must only fold snapshots of a single [`Period`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    Anomaly, Channel, ChannelAggregate, ChannelReport, ChannelStats, ComprehensiveReport,
    ErrorEntry, ErrorStats, Kpis, MetricsSnapshot, PerformanceStats, Period, Rates,
    ReportSummary, Trend, TrendSummary, UserEngagementReport, UserInsights, UserStats,
    WindowData,
};

/// Number of error types kept per snapshot.
const TOP_ERRORS_PER_SNAPSHOT: usize = 5;

/// Number of error entries kept in a comprehensive report.
const TOP_ERRORS_PER_REPORT: usize = 10;

/// Relative change (in percent) beyond which a trend is not `Stable`.
const TREND_THRESHOLD: f64 = 5.0;

/// Snapshots further than this many standard deviations from the mean are anomalies.
const ANOMALY_THRESHOLD: f64 = 2.0;

/// Fewest snapshots for which anomaly detection is meaningful.
const MIN_ANOMALY_SAMPLE: usize = 3;

/// `part / whole` as a whole percentage clamped to `[0, 100]`, or 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).round().clamp(0.0, 100.0)
}

/// `(sent - failed) / sent` as a whole percentage, or 0 when nothing was sent.
pub fn success_rate(sent: u64, failed: u64) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    ((sent as f64 - failed as f64) / sent as f64 * 100.0)
        .round()
        .clamp(0.0, 100.0)
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Build a snapshot from raw window counts.
///
/// All rates are computed here, at build time, so a persisted snapshot stays
/// internally consistent even if the formulas change later.
pub fn build_snapshot(
    data: WindowData,
    period: Period,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MetricsSnapshot {
    let counts = data.counts;

    let rates = Rates {
        success_rate: success_rate(counts.sent, counts.failed),
        delivery_rate: percentage(data.delivered, counts.sent),
        read_rate: percentage(data.read, data.delivered),
        click_rate: percentage(data.clicked, data.read),
    };

    let user_stats = UserStats {
        active_users: data.active_users,
        opted_out: data.opted_out,
        suspended: data.suspended,
        engagement_rate: percentage(data.engaged_users, data.active_users),
    };

    let performance = PerformanceStats {
        avg_processing_time_ms: round2(data.avg_processing_time_ms),
        avg_queue_wait_time_ms: round2(data.avg_queue_wait_time_ms),
        peak_time: data.peak_hour.map(|h| format!("{h:02}:00")),
        bottleneck: find_bottleneck(&data.channels),
    };

    MetricsSnapshot {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: now,
        period,
        window_start,
        window_end,
        counts,
        errors: rank_errors(data.errors),
        channel_stats: data.channels,
        rates,
        user_stats,
        performance,
    }
}

/// Tally error types and rank them by count (ties broken by name).
pub fn rank_errors(errors: Vec<(String, u64)>) -> ErrorStats {
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    for (error_type, count) in errors {
        *by_type.entry(error_type).or_default() += count;
    }

    let total_errors: u64 = by_type.values().sum();

    let mut ranked: Vec<(&String, &u64)> = by_type.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let top_errors = ranked
        .into_iter()
        .take(TOP_ERRORS_PER_SNAPSHOT)
        .map(|(error_type, &count)| ErrorEntry {
            error_type: error_type.clone(),
            count,
            percentage: if total_errors == 0 {
                0.0
            } else {
                round2(count as f64 / total_errors as f64 * 100.0)
            },
        })
        .collect();

    ErrorStats {
        total_errors,
        by_type,
        top_errors,
    }
}

/// The channel with the highest average delivery latency, if any has one.
fn find_bottleneck(channels: &BTreeMap<Channel, ChannelStats>) -> Option<Channel> {
    channels
        .iter()
        .filter(|(_, stats)| stats.avg_delivery_time_ms > 0.0)
        .fold(None::<(Channel, f64)>, |slowest, (&channel, stats)| match slowest {
            Some((_, worst)) if worst >= stats.avg_delivery_time_ms => slowest,
            _ => Some((channel, stats.avg_delivery_time_ms)),
        })
        .map(|(channel, _)| channel)
}

/// Classify the change between a first and last value.
///
/// Returns the trend and the relative change in percent. A zero baseline
/// counts as `Increasing` when the last value is positive.
pub fn classify_trend(first: f64, last: f64) -> (Trend, f64) {
    if first == 0.0 {
        return if last > 0.0 {
            (Trend::Increasing, 100.0)
        } else {
            (Trend::Stable, 0.0)
        };
    }

    let change = (last - first) / first * 100.0;
    let trend = if change > TREND_THRESHOLD {
        Trend::Increasing
    } else if change < -TREND_THRESHOLD {
        Trend::Decreasing
    } else {
        Trend::Stable
    };

    (trend, round2(change))
}

/// Derive headline KPIs from a single snapshot.
pub fn derive_kpis(snapshot: &MetricsSnapshot) -> Kpis {
    let users = &snapshot.user_stats;
    let audience = users.active_users + users.opted_out;
    let opt_out_rate = if audience == 0 {
        0.0
    } else {
        round2(users.opted_out as f64 / audience as f64 * 100.0)
    };

    Kpis {
        delivery_rate: snapshot.rates.delivery_rate,
        success_rate: snapshot.rates.success_rate,
        read_rate: snapshot.rates.read_rate,
        click_rate: snapshot.rates.click_rate,
        engagement_rate: users.engagement_rate,
        opt_out_rate,
    }
}

/// Fold per-channel counters over a range.
///
/// Delivery time is averaged over the snapshots that carry the channel.
pub fn fold_channels(snapshots: &[MetricsSnapshot]) -> BTreeMap<Channel, ChannelAggregate> {
    let mut sums: BTreeMap<Channel, (u64, u64, f64, usize)> = BTreeMap::new();

    for snapshot in snapshots {
        for (&channel, stats) in &snapshot.channel_stats {
            let entry = sums.entry(channel).or_default();
            entry.0 += stats.sent;
            entry.1 += stats.failed;
            entry.2 += stats.avg_delivery_time_ms;
            entry.3 += 1;
        }
    }

    sums.into_iter()
        .map(|(channel, (sent, failed, delivery_sum, n))| {
            let aggregate = ChannelAggregate {
                sent,
                failed,
                avg_delivery_time_ms: round2(delivery_sum / n as f64),
                success_rate: success_rate(sent, failed),
            };
            (channel, aggregate)
        })
        .collect()
}

/// Snapshots whose total deviates from the range mean by more than
/// [`ANOMALY_THRESHOLD`] population standard deviations.
pub fn detect_anomalies(snapshots: &[MetricsSnapshot]) -> Vec<Anomaly> {
    if snapshots.len() < MIN_ANOMALY_SAMPLE {
        return Vec::new();
    }

    let totals: Vec<f64> = snapshots.iter().map(|s| s.counts.total as f64).collect();
    let avg = mean(totals.iter().copied());
    let variance = mean(totals.iter().map(|t| (t - avg).powi(2)));
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return Vec::new();
    }

    snapshots
        .iter()
        .zip(totals)
        .filter_map(|(snapshot, total)| {
            let deviation = (total - avg).abs() / std_dev;
            (deviation > ANOMALY_THRESHOLD).then(|| Anomaly {
                snapshot_id: snapshot.id.clone(),
                window_start: snapshot.window_start,
                total: snapshot.counts.total,
                expected: round2(avg),
                deviation: round2(deviation),
            })
        })
        .collect()
}

fn recommendations(
    summary: &ReportSummary,
    insights: &UserInsights,
    top_errors: &[ErrorEntry],
) -> Vec<String> {
    let mut hints = Vec::new();

    if summary.success_rate < 90.0 {
        hints.push(format!(
            "Success rate averaged {:.1}%; review failing providers and retry policy.",
            summary.success_rate
        ));
    }
    if summary.delivery_rate < 85.0 {
        hints.push(format!(
            "Delivery rate averaged {:.1}%; check channel provider health.",
            summary.delivery_rate
        ));
    }
    if insights.avg_active_users > 0.0 && insights.avg_engagement_rate < 20.0 {
        hints.push(format!(
            "Engagement averaged {:.1}%; consider revising template content or send times.",
            insights.avg_engagement_rate
        ));
    }
    if let Some(top) = top_errors.first() {
        if top.percentage >= 50.0 {
            hints.push(format!(
                "Error type '{}' accounts for {:.1}% of failures in its window.",
                top.error_type, top.percentage
            ));
        }
    }

    hints
}

/// Fold a range of snapshots into a comprehensive report.
///
/// Fails with [`Error::NoData`] when the range is empty.
pub fn build_comprehensive_report(
    snapshots: &[MetricsSnapshot],
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ComprehensiveReport> {
    let (first, last) = match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(Error::NoData),
    };

    let summary = ReportSummary {
        snapshot_count: snapshots.len(),
        total_notifications: snapshots.iter().map(|s| s.counts.total).sum(),
        sent: snapshots.iter().map(|s| s.counts.sent).sum(),
        failed: snapshots.iter().map(|s| s.counts.failed).sum(),
        success_rate: round2(mean(snapshots.iter().map(|s| s.rates.success_rate))),
        delivery_rate: round2(mean(snapshots.iter().map(|s| s.rates.delivery_rate))),
    };

    let (volume, volume_change) =
        classify_trend(first.counts.total as f64, last.counts.total as f64);
    let (success_trend, success_rate_change) =
        classify_trend(first.rates.success_rate, last.rates.success_rate);

    // Range order, truncated, not re-ranked across snapshots
    let top_errors: Vec<ErrorEntry> = snapshots
        .iter()
        .flat_map(|s| s.errors.top_errors.iter().cloned())
        .take(TOP_ERRORS_PER_REPORT)
        .collect();

    let user_insights = UserInsights {
        avg_active_users: round2(mean(snapshots.iter().map(|s| s.user_stats.active_users as f64))),
        avg_opted_out: round2(mean(snapshots.iter().map(|s| s.user_stats.opted_out as f64))),
        avg_engagement_rate: round2(mean(snapshots.iter().map(|s| s.user_stats.engagement_rate))),
    };

    let recommendations = recommendations(&summary, &user_insights, &top_errors);

    Ok(ComprehensiveReport {
        period,
        start,
        end,
        generated_at: now,
        channels: fold_channels(snapshots),
        trends: TrendSummary {
            volume,
            volume_change,
            success_rate: success_trend,
            success_rate_change,
        },
        anomalies: detect_anomalies(snapshots),
        summary,
        top_errors,
        user_insights,
        recommendations,
    })
}

/// Per-channel report with best and worst channel by success rate.
///
/// Channels that sent nothing are not ranked. An empty range yields an
/// empty report.
pub fn build_channel_report(
    snapshots: &[MetricsSnapshot],
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ChannelReport {
    let channels = fold_channels(snapshots);

    let ranked = channels.iter().filter(|(_, agg)| agg.sent > 0);
    let best_channel = ranked
        .clone()
        .max_by(|a, b| a.1.success_rate.total_cmp(&b.1.success_rate))
        .map(|(&c, _)| c);
    let worst_channel = ranked
        .min_by(|a, b| a.1.success_rate.total_cmp(&b.1.success_rate))
        .map(|(&c, _)| c);

    ChannelReport {
        period,
        start,
        end,
        snapshot_count: snapshots.len(),
        channels,
        best_channel,
        worst_channel,
    }
}

/// Averaged user statistics over a range. An empty range yields zeros.
pub fn build_engagement_report(
    snapshots: &[MetricsSnapshot],
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> UserEngagementReport {
    let avg_active_users = mean(snapshots.iter().map(|s| s.user_stats.active_users as f64));
    let avg_opted_out = mean(snapshots.iter().map(|s| s.user_stats.opted_out as f64));
    let avg_suspended = mean(snapshots.iter().map(|s| s.user_stats.suspended as f64));
    let avg_engagement_rate = mean(snapshots.iter().map(|s| s.user_stats.engagement_rate));

    let audience = avg_active_users + avg_opted_out;
    let opt_out_rate = if audience == 0.0 {
        0.0
    } else {
        round2(avg_opted_out / audience * 100.0)
    };

    let engagement_trend = match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) => {
            classify_trend(
                first.user_stats.engagement_rate,
                last.user_stats.engagement_rate,
            )
            .0
        }
        _ => Trend::Stable,
    };

    UserEngagementReport {
        period,
        start,
        end,
        snapshot_count: snapshots.len(),
        avg_active_users: round2(avg_active_users),
        avg_opted_out: round2(avg_opted_out),
        avg_suspended: round2(avg_suspended),
        avg_engagement_rate: round2(avg_engagement_rate),
        opt_out_rate,
        engagement_trend,
    }
}
