//! Courier - notification delivery metrics and multilingual templates.
//!
//! # Overview
//!
//! Courier has two independent components:
//!
//! - [`metrics::MetricsAggregator`] periodically counts the raw notification
//!   log into immutable hourly and daily snapshots, and derives KPIs and
//!   range reports (trends, anomalies, per-channel and engagement views)
//!   from them.
//! - [`templates::TemplateRenderer`] keeps a cached catalog of built-in and
//!   custom templates in Arabic and English and renders notifications by
//!   substituting `{{variable}}` placeholders.
//!
//! Both are plain library types driven by the caller; the only background
//! work is the scheduled collection started by
//! [`metrics::MetricsAggregator::start_collection`].
//!
//! # Modules
//!
//! - [`model`]: Snapshot, raw record, KPI and report types
//! - [`storage`]: SQLite storage layer
//! - [`aggregation`]: Pure snapshot and report computation
//! - [`metrics`]: The metrics aggregator
//! - [`templates`]: Template catalog, cache and rendering
//! - [`events`]: Events published by the aggregator
//! - [`scheduler`]: Cancellable repeating tasks
//! - [`config`]: Environment configuration
//! - [`error`]: Error types

pub mod aggregation;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod storage;
pub mod templates;

pub use error::{Error, Result};
