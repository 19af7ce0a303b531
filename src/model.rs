//! Cross-cutting data model (spec §3): the types every component shares.
//!
//! `LogEntry` is exclusively owned and sequenced by the ring (`crate::ring`);
//! this module only defines its shape plus the enums that tag it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Where a LogEntry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Syslog,
    Oslog,
    Simulator,
    Device,
    Crash,
    Build,
    Proxy,
    AppDrain,
    Server,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Syslog => "syslog",
            SourceTag::Oslog => "oslog",
            SourceTag::Simulator => "simulator",
            SourceTag::Device => "device",
            SourceTag::Crash => "crash",
            SourceTag::Build => "build",
            SourceTag::Proxy => "proxy",
            SourceTag::AppDrain => "app_drain",
            SourceTag::Server => "server",
        }
    }
}

/// Severity, ordered low to high so `>=` filters work directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Fault,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "notice" => Some(Level::Notice),
            "warning" | "warn" => Some(Level::Warning),
            "error" => Some(Level::Error),
            "fault" => Some(Level::Fault),
            _ => None,
        }
    }
}

/// A single, immutable unit of log history. Sequence numbers are assigned
/// exclusively by the ring on append; everything else is set by the
/// producer (classifier/dedup may rewrite `level`/`category`/`count`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub source: SourceTag,
    pub process: Option<String>,
    pub level: Level,
    pub category: Option<String>,
    pub device_udid: String,
    pub message: String,
    pub raw: Option<String>,
    pub classification: Option<String>,
    pub fingerprint: u64,
    /// Rolling dedup count; 1 until suppressed repeats bump it.
    pub count: u64,
}

impl LogEntry {
    /// Build a fresh entry with seq=0 (assigned on ring append) and count=1.
    pub fn new(
        source: SourceTag,
        process: Option<String>,
        level: Level,
        device_udid: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let device_udid = device_udid.into();
        let fingerprint = fingerprint(level, process.as_deref(), &message);
        Self {
            seq: 0,
            timestamp: Utc::now(),
            source,
            process,
            level,
            category: None,
            device_udid,
            message,
            raw: None,
            classification: None,
            fingerprint,
            count: 1,
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// Fingerprint over (level, process, normalized message) per spec's
/// dedup key. Normalization strips ASCII digits so messages that differ
/// only by an embedded counter or id still collide.
pub fn fingerprint(level: Level, process: Option<&str>, message: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    level.hash(&mut hasher);
    process.unwrap_or("").hash(&mut hasher);
    normalize_message(message).hash(&mut hasher);
    hasher.finish()
}

fn normalize_message(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_ascii_digit() { '#' } else { c })
        .collect()
}

/// A position in the log stream, handed out by the summarizer/ring and
/// fed back in as `since_cursor`. Opaque to clients; just the seq in hex.
pub fn encode_cursor(seq: u64) -> String {
    format!("{seq:016x}")
}

pub fn decode_cursor(cursor: &str) -> Option<u64> {
    u64::from_str_radix(cursor, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_embedded_digits() {
        let a = LogEntry::new(SourceTag::Syslog, Some("p".into()), Level::Error, "default", "conn 1234 closed");
        let b = LogEntry::new(SourceTag::Syslog, Some("p".into()), Level::Error, "default", "conn 9999 closed");
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn cursor_roundtrips() {
        let c = encode_cursor(42);
        assert_eq!(decode_cursor(&c), Some(42));
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!(Level::parse("WARNING"), Some(Level::Warning));
        assert_eq!(Level::parse("bogus"), None);
    }
}
