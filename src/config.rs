use std::path::PathBuf;
use std::str::FromStr;

use chrono::{FixedOffset, Offset, Utc};

/// Largest offset accepted for the scheduling wall clock.
const MAX_OFFSET_MINUTES: i32 = 18 * 60;

/// Server settings read from `SHIFTD_*` environment variables.
/// Unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub utc_offset: FixedOffset,
    pub employees_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7433,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            utc_offset: Utc.fix(),
            employees_file: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let utc_offset = parsed::<i32>(&lookup, "SHIFTD_UTC_OFFSET_MINUTES")
            .filter(|m| m.abs() <= MAX_OFFSET_MINUTES)
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or(defaults.utc_offset);

        Self {
            bind: lookup("SHIFTD_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "SHIFTD_PORT").unwrap_or(defaults.port),
            data_dir: lookup("SHIFTD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: parsed::<usize>(&lookup, "SHIFTD_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SHIFTD_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "SHIFTD_METRICS_PORT"),
            utc_offset,
            employees_file: lookup("SHIFTD_EMPLOYEES_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("shifts.wal")
    }
}
