//! Runtime configuration loaded from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_URL: &str = "sqlite:courier.db?mode=rwc";

/// One hour between hourly collections.
pub const DEFAULT_HOURLY_INTERVAL_SECS: u64 = 3600;

/// One day between daily collections.
pub const DEFAULT_DAILY_INTERVAL_SECS: u64 = 86_400;

/// Snapshots older than this are removed by `clean_old_metrics`.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Lifetime of a cached custom template.
pub const DEFAULT_TEMPLATE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// Interval of the hourly collection timer. Shorter values simulate time.
    pub hourly_interval: Duration,

    /// Interval of the daily collection timer.
    pub daily_interval: Duration,

    pub retention_days: u32,

    pub template_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DB_URL.to_string(),
            hourly_interval: Duration::from_secs(DEFAULT_HOURLY_INTERVAL_SECS),
            daily_interval: Duration::from_secs(DEFAULT_DAILY_INTERVAL_SECS),
            retention_days: DEFAULT_RETENTION_DAYS,
            template_ttl: Duration::from_secs(DEFAULT_TEMPLATE_TTL_SECS),
        }
    }
}

impl Config {
    /// Load configuration from `COURIER_*` environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            database_url: lookup("COURIER_DATABASE_URL").unwrap_or(defaults.database_url),
            hourly_interval: parse_or(&lookup, "COURIER_HOURLY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.hourly_interval),
            daily_interval: parse_or(&lookup, "COURIER_DAILY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.daily_interval),
            retention_days: parse_or(&lookup, "COURIER_RETENTION_DAYS")
                .unwrap_or(defaults.retention_days),
            template_ttl: parse_or(&lookup, "COURIER_TEMPLATE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.template_ttl),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None);

        assert_eq!(config.database_url, DEFAULT_DB_URL);
        assert_eq!(config.hourly_interval, Duration::from_secs(3600));
        assert_eq!(config.daily_interval, Duration::from_secs(86_400));
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.template_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("COURIER_DATABASE_URL", "sqlite::memory:"),
            ("COURIER_HOURLY_INTERVAL_SECS", "5"),
            ("COURIER_RETENTION_DAYS", "not-a-number"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.hourly_interval, Duration::from_secs(5));
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
    }
}
