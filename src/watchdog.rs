//! Component K — watchdog (spec §4.K).
//!
//! Periodically inspects adapter and proxy status and converts every state
//! transition into one `server`-sourced `LogEntry`. Restart decisions
//! themselves live in `Supervisor::tick` (adapter capability, not something
//! this module reaches around); the watchdog only calls it on a timer and
//! narrates what changed. It never touches the flow store or device pool —
//! those stay the HTTP API's job.

use crate::adapters::supervisor::Supervisor;
use crate::adapters::{AdapterState, Pipeline};
use crate::model::{Level, LogEntry, SourceTag};
use crate::proxy::addon::MitmproxyAddon;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Watchdog {
    supervisor: Arc<Supervisor>,
    addon: Arc<MitmproxyAddon>,
    pipeline: Pipeline,
    interval: Duration,
    last_proxy_running: std::sync::Mutex<Option<bool>>,
}

impl Watchdog {
    pub fn new(supervisor: Arc<Supervisor>, addon: Arc<MitmproxyAddon>, pipeline: Pipeline, interval: Duration) -> Self {
        Self {
            supervisor,
            addon,
            pipeline,
            interval,
            last_proxy_running: std::sync::Mutex::new(None),
        }
    }

    /// Run until `shutdown` fires. Intended to be `tokio::spawn`ed once
    /// from `main`, alongside the adapters it watches over.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn tick(&self) {
        for (name, state) in self.supervisor.tick().await {
            self.log_adapter_transition(&name, state);
        }

        let running = self.addon.is_running().await;
        let changed = {
            let mut last = self.last_proxy_running.lock().unwrap();
            let changed = *last != Some(running);
            *last = Some(running);
            changed
        };
        if changed {
            self.log_proxy_transition(running);
        }
    }

    fn log_adapter_transition(&self, name: &str, state: AdapterState) {
        let level = match state {
            AdapterState::Error => Level::Error,
            AdapterState::Stopped => Level::Warning,
            AdapterState::Running | AdapterState::Watching => Level::Info,
        };
        let message = format!("adapter {name} -> {state:?}");
        self.pipeline.emit(LogEntry::new(SourceTag::Server, None, level, "default", message));
    }

    fn log_proxy_transition(&self, running: bool) {
        let (level, message) = if running {
            (Level::Info, "mitmproxy addon is running".to_string())
        } else {
            (Level::Warning, "mitmproxy addon is not running".to_string())
        };
        self.pipeline.emit(LogEntry::new(SourceTag::Server, None, level, "default", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::supervisor::RestartPolicy;
    use crate::ring::Ring;

    #[tokio::test]
    async fn tick_logs_nothing_when_nothing_registered() {
        let ring = Arc::new(Ring::new(10));
        let pipeline = Pipeline::new(ring.clone(), Duration::from_secs(30));
        let supervisor = Arc::new(Supervisor::new(pipeline.clone(), RestartPolicy::default()));
        let addon = Arc::new(MitmproxyAddon::new(&std::env::temp_dir().join("quern-watchdog-test-secret"), 9199).unwrap());
        let watchdog = Watchdog::new(supervisor, addon, pipeline, Duration::from_secs(5));
        watchdog.tick().await;
        assert_eq!(ring.len(), 1); // just the proxy-not-running transition
    }
}
