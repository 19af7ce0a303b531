//! Source adapter framework tuning (spec §4.F: restart backoff, join deadline).

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AdaptersConfig {
    /// Initial restart backoff for subprocess-backed adapters.
    pub restart_backoff_min_secs: u64,
    /// Cap on exponential restart backoff.
    pub restart_backoff_max_secs: u64,
    /// Backoff resets to min after this long spent continuously healthy.
    pub backoff_reset_after_secs: u64,
    /// Join deadline given to each adapter on shutdown.
    pub stop_deadline_secs: u64,
    /// Watchdog tick interval.
    pub watchdog_interval_secs: u64,
    /// Crash-report directory polling interval.
    pub crash_poll_interval_secs: u64,
    /// Stale device claim threshold for `devices/cleanup`.
    pub stale_claim_secs: u64,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            restart_backoff_min_secs: 1,
            restart_backoff_max_secs: 30,
            backoff_reset_after_secs: 60,
            stop_deadline_secs: 10,
            watchdog_interval_secs: 5,
            crash_poll_interval_secs: 2,
            stale_claim_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileAdaptersConfig {
    pub restart_backoff_min_secs: Option<u64>,
    pub restart_backoff_max_secs: Option<u64>,
    pub backoff_reset_after_secs: Option<u64>,
    pub stop_deadline_secs: Option<u64>,
    pub watchdog_interval_secs: Option<u64>,
    pub crash_poll_interval_secs: Option<u64>,
    pub stale_claim_secs: Option<u64>,
}

impl AdaptersConfig {
    pub fn from_file(file: Option<FileAdaptersConfig>) -> Self {
        let file = file.unwrap_or_default();
        let d = AdaptersConfig::default();
        Self {
            restart_backoff_min_secs: file.restart_backoff_min_secs.unwrap_or(d.restart_backoff_min_secs),
            restart_backoff_max_secs: file.restart_backoff_max_secs.unwrap_or(d.restart_backoff_max_secs),
            backoff_reset_after_secs: file.backoff_reset_after_secs.unwrap_or(d.backoff_reset_after_secs),
            stop_deadline_secs: file.stop_deadline_secs.unwrap_or(d.stop_deadline_secs),
            watchdog_interval_secs: file.watchdog_interval_secs.unwrap_or(d.watchdog_interval_secs),
            crash_poll_interval_secs: file.crash_poll_interval_secs.unwrap_or(d.crash_poll_interval_secs),
            stale_claim_secs: file.stale_claim_secs.unwrap_or(d.stale_claim_secs),
        }
    }
}
