//! Proxy flow store sizing (spec §4.I).

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Port the supervised mitmproxy process listens on.
    pub port: u16,
    /// Max number of flows retained before the oldest is evicted.
    pub max_flows: usize,
    /// Flow bodies larger than this are stored truncated.
    pub max_body_bytes: usize,
    /// Default auto-release timeout for held (intercepted) flows.
    pub hold_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 9101,
            max_flows: 10_000,
            max_body_bytes: 1_048_576,
            hold_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileProxyConfig {
    pub port: Option<u16>,
    pub max_flows: Option<usize>,
    pub max_body_bytes: Option<usize>,
    pub hold_timeout_secs: Option<u64>,
}

impl ProxyConfig {
    pub fn from_file(file: Option<FileProxyConfig>) -> Self {
        let file = file.unwrap_or_default();
        let d = ProxyConfig::default();
        Self {
            port: file.port.unwrap_or(d.port),
            max_flows: file.max_flows.unwrap_or(d.max_flows),
            max_body_bytes: file.max_body_bytes.unwrap_or(d.max_body_bytes),
            hold_timeout_secs: file.hold_timeout_secs.unwrap_or(d.hold_timeout_secs),
        }
    }
}
