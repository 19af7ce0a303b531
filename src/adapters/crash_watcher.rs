//! Crash report watcher (spec §4.G): polls a directory of `.crash`/`.ips`
//! files dropped by the simulator or a connected device, parses just
//! enough of each to emit one summary `LogEntry`, and leaves the report
//! itself on disk as the source of truth for anything the summary omits.

use super::{Adapter, AdapterFilter, AdapterState, AdapterStatus, Pipeline};
use crate::model::{LogEntry, Level, SourceTag};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct CrashWatcher {
    dir: PathBuf,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    dropped_lines: AtomicU64,
    state: StdMutex<AdapterState>,
}

impl CrashWatcher {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            shutdown: Mutex::new(None),
            dropped_lines: AtomicU64::new(0),
            state: StdMutex::new(AdapterState::Stopped),
        }
    }
}

/// Pull the exception type, signal, and crashing thread summary out of a
/// crash report. Deliberately shallow: the report itself stays on disk for
/// anyone who wants the full backtrace.
fn parse_crash_report(contents: &str, path: &std::path::Path) -> LogEntry {
    let exception = contents
        .lines()
        .find(|l| l.starts_with("Exception Type:"))
        .map(|l| l.trim_start_matches("Exception Type:").trim().to_string());
    let process = contents
        .lines()
        .find(|l| l.starts_with("Process:"))
        .map(|l| l.trim_start_matches("Process:").trim().split_whitespace().next().unwrap_or("").to_string());
    let crashed_thread = contents
        .lines()
        .find(|l| l.contains("Crashed Thread"))
        .map(str::trim)
        .unwrap_or("Crashed Thread: unknown");

    let message = match &exception {
        Some(ex) => format!("Crash report {}: {} ({})", path.file_name().unwrap().to_string_lossy(), ex, crashed_thread),
        None => format!("Crash report {} (unparsed)", path.file_name().unwrap().to_string_lossy()),
    };

    LogEntry::new(SourceTag::Crash, process, Level::Fault, "default", message).with_raw(contents.to_string())
}

#[async_trait]
impl Adapter for CrashWatcher {
    fn name(&self) -> &str {
        "crash_watcher"
    }

    async fn start(&self, pipeline: Pipeline) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.ok();
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().await = Some(tx);
        *self.state.lock().unwrap() = AdapterState::Watching;

        let dir = self.dir.clone();
        let watcher = Arc::new(CrashWatcherLoop {
            dir,
            seen: StdMutex::new(HashSet::new()),
        });
        tokio::spawn(async move {
            loop {
                watcher.scan_once(&pipeline).await;
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = rx.changed() => break,
                }
            }
        });
        Ok(())
    }

    async fn stop(&self, _deadline: Duration) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(true);
        }
        *self.state.lock().unwrap() = AdapterState::Stopped;
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            name: self.name().to_string(),
            state: *self.state.lock().unwrap(),
            detail: format!("watching {}", self.dir.display()),
            restarts: 0,
            dropped_lines: self.dropped_lines.load(Ordering::Relaxed),
        }
    }

    fn reconfigure(&self, _filter: AdapterFilter) {
        // Crash reports carry their own process name; a filter doesn't
        // apply to "which file do we read next", so this is a no-op.
    }
}

/// The spawned task needs its own handle to scan_once's dependencies
/// without borrowing `self` across the `tokio::spawn`'d future's lifetime.
struct CrashWatcherLoop {
    dir: PathBuf,
    seen: StdMutex<HashSet<String>>,
}

impl CrashWatcherLoop {
    async fn scan_once(&self, pipeline: &Pipeline) {
        let Ok(mut rd) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        loop {
            let entry = match rd.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(_) => break,
            };
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
            if ext != "crash" && ext != "ips" {
                continue;
            }
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            {
                let mut seen = self.seen.lock().unwrap();
                if seen.contains(&name) {
                    continue;
                }
                seen.insert(name.clone());
            }
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                pipeline.emit(parse_crash_report(&contents, &path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_exception_and_process() {
        let sample = "Process: MyApp [1234]\nException Type: EXC_BAD_ACCESS\nCrashed Thread: 0\n";
        let entry = parse_crash_report(sample, std::path::Path::new("report.crash"));
        assert_eq!(entry.process.as_deref(), Some("MyApp"));
        assert!(entry.message.contains("EXC_BAD_ACCESS"));
        assert_eq!(entry.level, Level::Fault);
    }

    #[test]
    fn parse_tolerates_unrecognized_format() {
        let entry = parse_crash_report("garbage", std::path::Path::new("x.ips"));
        assert!(entry.message.contains("unparsed"));
    }
}
