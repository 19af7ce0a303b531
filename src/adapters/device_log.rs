//! Device/simulator log streamer (spec §4.G): wraps a subprocess that
//! streams `syslog`/`oslog`-style lines (simulator's `log stream` or a
//! device's log relay) and feeds them into the pipeline. One instance
//! handles one source/device; the watchdog restarts it on unexpected exit.

use super::subprocess::ManagedChild;
use super::{Adapter, AdapterFilter, AdapterState, AdapterStatus, Pipeline};
use crate::model::{Level, LogEntry, SourceTag};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

pub struct DeviceLogAdapter {
    name: String,
    source: SourceTag,
    device_udid: String,
    program: String,
    args: Vec<String>,
    managed: Arc<ManagedChild>,
    filter: StdMutex<AdapterFilter>,
    state: StdMutex<AdapterState>,
}

impl DeviceLogAdapter {
    pub fn new(name: impl Into<String>, source: SourceTag, device_udid: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            source,
            device_udid: device_udid.into(),
            program: program.into(),
            args,
            managed: Arc::new(ManagedChild::new()),
            filter: StdMutex::new(AdapterFilter::default()),
            state: StdMutex::new(AdapterState::Stopped),
        }
    }
}

/// Best-effort parse of a raw relay line into (process, level, message).
/// Unrecognized formats pass through as Info-level with no process tag.
fn parse_line(raw: &str) -> (Option<String>, Level, String) {
    if let Some(rest) = raw.strip_prefix("<Error>") {
        return (extract_process(rest), Level::Error, rest.trim().to_string());
    }
    if let Some(rest) = raw.strip_prefix("<Warning>") {
        return (extract_process(rest), Level::Warning, rest.trim().to_string());
    }
    if let Some(rest) = raw.strip_prefix("<Notice>") {
        return (extract_process(rest), Level::Notice, rest.trim().to_string());
    }
    (extract_process(raw), Level::Info, raw.trim().to_string())
}

fn extract_process(line: &str) -> Option<String> {
    // Device relay lines commonly look like "ProcessName[123]: message".
    let bracket = line.find('[')?;
    let name = line[..bracket].trim();
    if name.is_empty() || name.contains(' ') {
        None
    } else {
        Some(name.to_string())
    }
}

#[async_trait]
impl Adapter for DeviceLogAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, pipeline: Pipeline) -> anyhow::Result<()> {
        let mut rx = self.managed.spawn_line_stream(&self.program, &self.args).await?;
        *self.state.lock().unwrap() = AdapterState::Running;

        let source = self.source;
        let device_udid = self.device_udid.clone();
        let filter_src = Arc::new(StdMutex::new(self.filter.lock().unwrap().clone()));
        let filter_handle = filter_src.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let (process, level, message) = parse_line(&raw);
                let filter = filter_handle.lock().unwrap().clone();
                if let Some(want) = &filter.process {
                    if process.as_deref() != Some(want.as_str()) {
                        continue;
                    }
                }
                if let Some(exclude) = &filter.exclude_substring {
                    if message.contains(exclude.as_str()) {
                        continue;
                    }
                }
                let entry = LogEntry::new(source, process, level, device_udid.clone(), message).with_raw(raw);
                pipeline.emit(entry);
            }
        });
        Ok(())
    }

    async fn stop(&self, deadline: Duration) {
        self.managed.stop(deadline).await;
        *self.state.lock().unwrap() = AdapterState::Stopped;
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            name: self.name.clone(),
            state: *self.state.lock().unwrap(),
            detail: format!("{} -> device {}", self.program, self.device_udid),
            restarts: self.managed.restarts.load(Ordering::Relaxed),
            dropped_lines: self.managed.dropped_lines.load(Ordering::Relaxed),
        }
    }

    fn reconfigure(&self, filter: AdapterFilter) {
        *self.filter.lock().unwrap() = filter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_recognizes_level_prefixes() {
        let (process, level, message) = parse_line("<Error>MyApp[123]: something broke");
        assert_eq!(level, Level::Error);
        assert_eq!(process.as_deref(), Some("MyApp"));
        assert!(message.contains("something broke"));
    }

    #[test]
    fn parse_line_defaults_to_info() {
        let (_, level, _) = parse_line("plain unadorned line");
        assert_eq!(level, Level::Info);
    }
}
