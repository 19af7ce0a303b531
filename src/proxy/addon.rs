//! mitmproxy subprocess supervision and the loopback channel back to it.
//!
//! Quern never terminates TLS itself; a mitmproxy addon script does that
//! and posts completed flows to our internal ingest endpoint (never
//! exposed on the public router) authenticated with a shared secret
//! written to a control file only the addon and this process can read.
//! Held-flow release-with-modifications calls back into the addon over
//! the same loopback link.

use crate::adapters::subprocess::ManagedChild;
use crate::proxy::intercept::ReleaseDecision;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub struct MitmproxyAddon {
    managed: Arc<ManagedChild>,
    addon_port: u16,
    shared_secret: String,
    client: reqwest::Client,
}

impl MitmproxyAddon {
    /// Load (or mint) the shared secret used to authenticate the addon's
    /// loopback posts and our release callbacks back to it.
    pub fn new(secret_path: &Path, addon_port: u16) -> anyhow::Result<Self> {
        let shared_secret = load_or_create_secret(secret_path)?;
        Ok(Self {
            managed: Arc::new(ManagedChild::new()),
            addon_port,
            shared_secret,
            client: reqwest::Client::new(),
        })
    }

    pub fn shared_secret(&self) -> &str {
        &self.shared_secret
    }

    /// Spawn mitmdump with our addon script pointed at the ingest port.
    pub async fn start(&self, script_path: &Path, listen_port: u16, ingest_port: u16) -> anyhow::Result<()> {
        let args = vec![
            "-s".to_string(),
            script_path.to_string_lossy().to_string(),
            "--listen-port".to_string(),
            listen_port.to_string(),
            "--set".to_string(),
            format!("quern_ingest_port={ingest_port}"),
            "--set".to_string(),
            format!("quern_shared_secret={}", self.shared_secret),
        ];
        self.managed.spawn_line_stream("mitmdump", &args).await?;
        Ok(())
    }

    pub async fn stop(&self, deadline: Duration) {
        self.managed.stop(deadline).await;
    }

    pub async fn is_running(&self) -> bool {
        self.managed.is_running().await
    }

    pub fn restarts(&self) -> u64 {
        self.managed.restarts.load(Ordering::Relaxed)
    }

    /// Tell the addon to release a held flow, optionally with a modified
    /// request, by posting back to its own control port.
    pub async fn release_held_flow(&self, flow_id: &str, decision: &ReleaseDecision) -> anyhow::Result<()> {
        let url = format!("http://127.0.0.1:{}/quern-release/{flow_id}", self.addon_port);
        let body = serde_json::to_value(decision)?;
        self.client
            .post(&url)
            .header("X-Quern-Secret", &self.shared_secret)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn load_or_create_secret(path: &PathBuf) -> anyhow::Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let secret = existing.trim().to_string();
        if !secret.is_empty() {
            return Ok(secret);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    std::fs::write(path, &secret)?;
    Ok(secret)
}

/// Also used to validate the shared secret presented by a request to the
/// internal ingest endpoint before it ever touches the flow store.
pub fn validate_secret(expected: &str, presented: Option<&str>) -> bool {
    presented.map(|p| p == expected).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn secret_persists_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proxy-secret");
        let s1 = load_or_create_secret(&path).unwrap();
        let s2 = load_or_create_secret(&path).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn validate_secret_rejects_missing_or_wrong() {
        assert!(validate_secret("abc", Some("abc")));
        assert!(!validate_secret("abc", Some("xyz")));
        assert!(!validate_secret("abc", None));
    }
}
