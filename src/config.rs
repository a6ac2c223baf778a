use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::{DEFAULT_COMPACT_THRESHOLD, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_EVENT_WORKERS};

/// Process settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub event_queue_capacity: usize,
    pub event_workers: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub forbid_cancel_after_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            event_workers: DEFAULT_EVENT_WORKERS,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
            forbid_cancel_after_start: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SPACEBOOK_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            event_queue_capacity: parse(lookup("SPACEBOOK_EVENT_QUEUE_CAPACITY"))
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_queue_capacity),
            event_workers: parse(lookup("SPACEBOOK_EVENT_WORKERS"))
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_workers),
            compact_threshold: parse(lookup("SPACEBOOK_COMPACT_THRESHOLD"))
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse(lookup("SPACEBOOK_METRICS_PORT")),
            forbid_cancel_after_start: lookup("SPACEBOOK_FORBID_CANCEL_AFTER_START")
                .and_then(|s| parse_flag(&s))
                .unwrap_or(defaults.forbid_cancel_after_start),
        }
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
