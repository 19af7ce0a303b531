//! Supervisor owning a set of adapters: starts them, restarts
//! subprocess-backed ones on failure with capped exponential backoff, and
//! fans out a shutdown signal with a per-adapter join deadline.

use super::{Adapter, AdapterFilter, AdapterState, AdapterStatus, Pipeline};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RestartPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub reset_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Backoff for the `attempt`-th consecutive restart (0-indexed),
    /// doubling each time and capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.min(20);
        let scaled = self.min_backoff.saturating_mul(1u32.checked_shl(doublings).unwrap_or(u32::MAX));
        scaled.min(self.max_backoff)
    }
}

struct Managed {
    adapter: Arc<dyn Adapter>,
    stop_deadline: Duration,
    attempt: u32,
    last_state: AdapterState,
    last_change: Instant,
}

/// Owns the adapter set and the pipeline they all emit into. Also owns the
/// restart decision: a watchdog (component K) just calls `tick()` on a
/// timer and logs whatever transitions come back.
pub struct Supervisor {
    pipeline: Pipeline,
    adapters: Mutex<HashMap<String, Managed>>,
    policy: RestartPolicy,
    shutting_down: AtomicBool,
}

impl Supervisor {
    pub fn new(pipeline: Pipeline, policy: RestartPolicy) -> Self {
        Self {
            pipeline,
            adapters: Mutex::new(HashMap::new()),
            policy,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register and start an adapter. `start` must return promptly per
    /// the contract; long-lived work happens on adapter-owned tasks.
    pub async fn register(&self, adapter: Arc<dyn Adapter>, stop_deadline: Duration) -> anyhow::Result<()> {
        let name = adapter.name().to_string();
        adapter.start(self.pipeline.clone()).await?;
        let last_state = adapter.status().state;
        self.adapters.lock().await.insert(
            name,
            Managed {
                adapter,
                stop_deadline,
                attempt: 0,
                last_state,
                last_change: Instant::now(),
            },
        );
        Ok(())
    }

    pub async fn statuses(&self) -> Vec<AdapterStatus> {
        let adapters = self.adapters.lock().await;
        adapters.values().map(|m| m.adapter.status()).collect()
    }

    pub async fn reconfigure(&self, name: &str, filter: AdapterFilter) -> bool {
        let adapters = self.adapters.lock().await;
        match adapters.get(name) {
            Some(m) => {
                m.adapter.reconfigure(filter);
                true
            }
            None => false,
        }
    }

    /// One watchdog tick: collect state transitions since the last tick,
    /// and restart any adapter that has gone `Stopped`/`Error` once its
    /// backoff has elapsed. Returns the transitions so the caller can log
    /// them; restart attempts themselves are not surfaced here, only the
    /// resulting state change on a later tick.
    pub async fn tick(&self) -> Vec<(String, AdapterState)> {
        let mut adapters = self.adapters.lock().await;
        let mut transitions = Vec::new();
        let shutting_down = self.shutting_down.load(Ordering::Relaxed);
        for (name, managed) in adapters.iter_mut() {
            let state = managed.adapter.status().state;
            if state != managed.last_state {
                transitions.push((name.clone(), state));
                managed.last_state = state;
                managed.last_change = Instant::now();
            }
            match state {
                AdapterState::Running | AdapterState::Watching => {
                    if managed.last_change.elapsed() >= self.policy.reset_after {
                        managed.attempt = 0;
                    }
                }
                AdapterState::Stopped | AdapterState::Error if !shutting_down => {
                    if managed.last_change.elapsed() >= self.policy.backoff_for(managed.attempt) {
                        if managed.adapter.start(self.pipeline.clone()).await.is_ok() {
                            managed.attempt += 1;
                            managed.last_change = Instant::now();
                        }
                    }
                }
                _ => {}
            }
        }
        transitions
    }

    /// Fan out a shutdown signal to every adapter and join each with its
    /// configured deadline. Suppresses further restart attempts from
    /// `tick()` even if a caller races a tick against shutdown.
    pub async fn shutdown_all(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        let adapters = self.adapters.lock().await;
        for managed in adapters.values() {
            managed.adapter.stop(managed.stop_deadline).await;
        }
    }

    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RestartPolicy {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
        };
        assert_eq!(p.backoff_for(0), Duration::from_secs(1));
        assert_eq!(p.backoff_for(1), Duration::from_secs(2));
        assert_eq!(p.backoff_for(2), Duration::from_secs(4));
        assert_eq!(p.backoff_for(10), Duration::from_secs(30)); // capped
    }
}
