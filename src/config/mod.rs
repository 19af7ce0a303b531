//! Configuration for the Quern daemon.
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. `~/.quern/config.json` (persisted state layout, spec §6)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

mod ring;
mod adapters;
mod proxy;

pub use adapters::AdaptersConfig;
pub use proxy::ProxyConfig;
pub use ring::RingConfig;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Preferred HTTP API port; the daemon scans upward from here.
    pub port: u16,
    /// Max number of ports to try when scanning for a free one (spec §4.B).
    pub port_scan_tries: u16,
    /// Whether to run detached (fork) vs. stay in the foreground.
    pub daemonize: bool,

    pub ring: RingConfig,
    pub adapters: AdaptersConfig,
    pub proxy: ProxyConfig,

    pub log_level: String,

    /// Directory holding all Quern persisted state (`~/.quern` by default).
    pub state_dir: PathBuf,
}

impl Config {
    pub fn state_dir_default() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quern")
    }

    pub fn api_key_path(&self) -> PathBuf {
        self.state_dir.join("api-key")
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn device_pool_path(&self) -> PathBuf {
        self.state_dir.join("device-pool.json")
    }

    pub fn cert_state_path(&self) -> PathBuf {
        self.state_dir.join("cert-state.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }

    pub fn server_log_path(&self) -> PathBuf {
        self.state_dir.join("server.log")
    }

    pub fn crash_dir(&self) -> PathBuf {
        self.state_dir.join("crashes")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9100,
            port_scan_tries: 32,
            daemonize: false,
            ring: RingConfig::default(),
            adapters: AdaptersConfig::default(),
            proxy: ProxyConfig::default(),
            log_level: "info".to_string(),
            state_dir: Self::state_dir_default(),
        }
    }
}

/// Config file structure (subset of `Config` that makes sense to persist),
/// mirrored at `~/.quern/config.json`.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub port: Option<u16>,
    pub port_scan_tries: Option<u16>,
    pub log_level: Option<String>,
    pub ring: Option<ring::FileRingConfig>,
    pub adapters: Option<adapters::FileAdaptersConfig>,
    pub proxy: Option<proxy::FileProxyConfig>,
}

impl Config {
    /// Create the config file with defaults if it doesn't exist yet. Helps
    /// operators discover options without requiring them upfront.
    pub fn ensure_config_exists(state_dir: &PathBuf) {
        let path = state_dir.join("config.json");
        if path.exists() {
            return;
        }
        if std::fs::create_dir_all(state_dir).is_err() {
            return;
        }
        let template = serde_json::json!({
            "port": 9100,
            "port_scan_tries": 32,
            "log_level": "info",
            "ring": { "capacity": 10_000, "dedup_window_secs": 30 },
            "adapters": { "restart_backoff_min_secs": 1, "restart_backoff_max_secs": 30 },
            "proxy": { "port": 9101, "max_flows": 10_000, "max_body_bytes": 1_048_576 },
        });
        let _ = std::fs::write(path, serde_json::to_string_pretty(&template).unwrap());
    }

    fn load_file_config(path: &PathBuf) -> FileConfig {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Config error: failed to parse {}: {e}", path.display());
                std::process::exit(4);
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("Config error: cannot read {}: {e}", path.display());
                std::process::exit(4);
            }
        }
    }

    /// Load configuration: env vars > file > defaults. `state_dir` is
    /// resolved first (env override, else `~/.quern`) since everything
    /// else lives under it.
    pub fn from_env() -> Self {
        let state_dir = std::env::var("QUERN_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::state_dir_default());

        let file = Self::load_file_config(&state_dir.join("config.json"));

        let port = std::env::var("QUERN_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.port)
            .unwrap_or(9100);

        let port_scan_tries = file.port_scan_tries.unwrap_or(32);

        let log_level = std::env::var("QUERN_LOG")
            .ok()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        let daemonize = std::env::var("QUERN_DAEMONIZE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let ring = RingConfig::from_file(file.ring);
        let adapters = AdaptersConfig::from_file(file.adapters);
        let proxy_cfg = ProxyConfig::from_file(file.proxy);

        Self {
            port,
            port_scan_tries,
            daemonize,
            ring,
            adapters,
            proxy: proxy_cfg,
            log_level,
            state_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.port, 9100);
        assert_eq!(c.ring.capacity, 10_000);
        assert_eq!(c.proxy.port, 9101);
    }
}
