//! Component A — state file & API key store (spec §4.A).
//!
//! The state file is the single source of truth for discovering a running
//! instance. It's written atomically (write-temp-then-rename) after the
//! HTTP listener is bound, and deleted on clean exit. Readers must treat
//! an empty or unparseable file as "no instance" rather than erroring.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerState {
    pub pid: u32,
    pub http_port: u16,
    pub proxy_port: u16,
    pub proxy_enabled: bool,
    pub proxy_status: String,
    pub start_time: DateTime<Utc>,
    pub api_key: String,
    pub active_device_udids: Vec<String>,
}

/// Write the state file atomically: write to a temp file in the same
/// directory, then rename over the final path. Rename within one
/// filesystem is atomic, so readers never observe a partial write.
pub fn write_state_atomic(path: &Path, state: &ServerState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp_path)?;
    f.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
    f.flush()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read the state file. Any I/O or parse failure is treated as "no
/// instance" per spec, not surfaced as an error.
pub fn read_state(path: &Path) -> Option<ServerState> {
    let contents = fs::read_to_string(path).ok()?;
    if contents.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&contents).ok()
}

pub fn delete_state(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Is the PID in `state` still alive? Signal 0 doesn't deliver a signal,
/// it only checks permission/existence.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc_kill0(pid as i32) == 0 }
}

#[cfg(unix)]
fn libc_kill0(pid: i32) -> i32 {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    unsafe { kill(pid, 0) }
}

#[cfg(not(unix))]
pub fn pid_is_alive(_pid: u32) -> bool {
    false
}

/// Load the persistent API key, creating a fresh 32-byte hex token on
/// first start. Permissions are restricted to the owner where supported.
pub fn load_or_create_api_key(path: &Path) -> anyhow::Result<String> {
    if let Ok(existing) = fs::read_to_string(path) {
        let key = existing.trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    fs::write(path, &key)?;
    restrict_permissions(path);
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Check whether a running instance answers `/health` within `timeout`.
pub async fn check_health(port: u16, timeout: std::time::Duration) -> bool {
    let url = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::Client::new();
    tokio::time::timeout(timeout, client.get(&url).send())
        .await
        .ok()
        .and_then(|r| r.ok())
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

#[allow(dead_code)]
pub fn state_file_temp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_state() -> ServerState {
        ServerState {
            pid: std::process::id(),
            http_port: 9100,
            proxy_port: 9101,
            proxy_enabled: false,
            proxy_status: "stopped".into(),
            start_time: Utc::now(),
            api_key: "deadbeef".into(),
            active_device_udids: vec![],
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_state_atomic(&path, &sample_state()).unwrap();
        let read = read_state(&path).unwrap();
        assert_eq!(read.http_port, 9100);
    }

    #[test]
    fn missing_file_is_none_not_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(read_state(&path).is_none());
    }

    #[test]
    fn empty_file_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "").unwrap();
        assert!(read_state(&path).is_none());
    }

    #[test]
    fn api_key_persists_across_calls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("api-key");
        let k1 = load_or_create_api_key(&path).unwrap();
        let k2 = load_or_create_api_key(&path).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64); // 32 bytes hex-encoded
    }

    #[test]
    fn delete_state_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_state_atomic(&path, &sample_state()).unwrap();
        delete_state(&path);
        assert!(!path.exists());
    }
}
