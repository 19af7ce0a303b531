//! Ring buffer and dedup window sizing (spec §4.C, §4.D).

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Fixed capacity of the LogEntry ring.
    pub capacity: usize,
    /// Sliding window for rolling fingerprint suppression.
    pub dedup_window_secs: u64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            dedup_window_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileRingConfig {
    pub capacity: Option<usize>,
    pub dedup_window_secs: Option<u64>,
}

impl RingConfig {
    pub fn from_file(file: Option<FileRingConfig>) -> Self {
        let file = file.unwrap_or_default();
        let d = RingConfig::default();
        Self {
            capacity: file.capacity.unwrap_or(d.capacity),
            dedup_window_secs: file.dedup_window_secs.unwrap_or(d.dedup_window_secs),
        }
    }
}
