use std::path::PathBuf;
use std::time::Duration;

use crate::limits::DEFAULT_LOCK_TIMEOUT_MS;

/// Host settings, read from `SEATD_*` environment variables. Anything unset
/// or unparseable falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            sweep_interval: Duration::from_secs(300),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("SEATD_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: parsed("SEATD_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            sweep_interval: parsed("SEATD_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: parsed("SEATD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("SEATD_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("seatd.wal")
    }
}
