//! Component I — proxy flow store (spec §4.I).
//!
//! Quern doesn't terminate TLS itself: a supervised `mitmproxy` subprocess
//! (see `addon`) does the interception and posts completed flows to an
//! internal loopback endpoint, which is where this store is fed from. The
//! store indexes flows for query, and hosts the intercept/mock rule
//! registries that the addon consults before releasing a flow.

pub mod addon;
pub mod ingest;
pub mod intercept;
pub mod mocks;

pub use intercept::{HeldFlow, InterceptRule, InterceptRuleId};
pub use mocks::MockRule;

use crate::error::{AppError, AppResult};
use crate::util::truncate_utf8_safe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub body_truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub body_truncated: bool,
}

/// How a flow came to exist (spec §3): a real proxied request, a replayed
/// capture, or a synthetic record of a served mock response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSource {
    Live,
    Replay,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub device_udid: Option<String>,
    pub request: FlowRequest,
    pub response: Option<FlowResponse>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub source: FlowSource,
}

impl Flow {
    pub fn host(&self) -> String {
        url::parse_host(&self.request.url)
    }

    pub fn status_bucket(&self) -> &'static str {
        match self.response.as_ref().map(|r| r.status) {
            Some(s) if (200..300).contains(&s) => "2xx",
            Some(s) if (300..400).contains(&s) => "3xx",
            Some(s) if (400..500).contains(&s) => "4xx",
            Some(s) if (500..600).contains(&s) => "5xx",
            Some(_) => "other",
            None if self.error.is_some() => "error",
            None => "pending",
        }
    }
}

/// Truncate a body to `max_bytes`, flagging truncation so clients know the
/// stored copy isn't complete.
pub fn truncate_body(body: Option<String>, max_bytes: usize) -> (Option<String>, bool) {
    match body {
        Some(b) if b.len() > max_bytes => (Some(truncate_utf8_safe(&b, max_bytes).to_string()), true),
        other => (other, false),
    }
}

mod url {
    pub fn parse_host(raw: &str) -> String {
        let without_scheme = raw.split("://").nth(1).unwrap_or(raw);
        without_scheme.split(['/', '?']).next().unwrap_or(without_scheme).to_string()
    }

    pub fn parse_path(raw: &str) -> String {
        let without_scheme = raw.split("://").nth(1).unwrap_or(raw);
        match without_scheme.find('/') {
            Some(idx) => without_scheme[idx..].split('?').next().unwrap_or("/").to_string(),
            None => "/".to_string(),
        }
    }
}

/// Exposed to `ingest` (a sibling module, not just this file) so it can
/// match mock/intercept rules against a raw request URL without
/// constructing a full `Flow` first.
pub(crate) fn host_and_path(url: &str) -> (String, String) {
    (self::url::parse_host(url), self::url::parse_path(url))
}

struct Indexes {
    by_host: HashMap<String, Vec<String>>,
    by_status_bucket: HashMap<&'static str, Vec<String>>,
    by_udid: HashMap<String, Vec<String>>,
}

impl Indexes {
    fn new() -> Self {
        Self {
            by_host: HashMap::new(),
            by_status_bucket: HashMap::new(),
            by_udid: HashMap::new(),
        }
    }

    fn insert(&mut self, flow: &Flow) {
        self.by_host.entry(flow.host()).or_default().push(flow.id.clone());
        self.by_status_bucket.entry(flow.status_bucket()).or_default().push(flow.id.clone());
        if let Some(udid) = &flow.device_udid {
            self.by_udid.entry(udid.clone()).or_default().push(flow.id.clone());
        }
    }

    fn remove(&mut self, flow: &Flow) {
        remove_one(&mut self.by_host, &flow.host(), &flow.id);
        remove_one(&mut self.by_status_bucket, &flow.status_bucket(), &flow.id);
        if let Some(udid) = &flow.device_udid {
            remove_one(&mut self.by_udid, udid, &flow.id);
        }
    }
}

fn remove_one<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Vec<String>>, key: &K, id: &str) {
    if let Some(v) = map.get_mut(key) {
        v.retain(|x| x != id);
    }
}

#[derive(Debug, Default, Clone)]
pub struct FlowFilter {
    pub host: Option<String>,
    pub status_bucket: Option<String>,
    pub device_udid: Option<String>,
    pub client_ip: Option<String>,
}

struct Inner {
    flows: HashMap<String, Flow>,
    order: VecDeque<String>,
    indexes: Indexes,
}

/// Indexed, bounded store of completed (or errored) flows.
pub struct FlowStore {
    max_flows: usize,
    inner: Mutex<Inner>,
}

impl FlowStore {
    pub fn new(max_flows: usize) -> Self {
        Self {
            max_flows,
            inner: Mutex::new(Inner {
                flows: HashMap::new(),
                order: VecDeque::new(),
                indexes: Indexes::new(),
            }),
        }
    }

    pub fn insert(&self, flow: Flow) {
        let mut inner = self.inner.lock().unwrap();
        inner.indexes.insert(&flow);
        inner.order.push_back(flow.id.clone());
        inner.flows.insert(flow.id.clone(), flow);

        while inner.order.len() > self.max_flows {
            if let Some(evicted_id) = inner.order.pop_front() {
                if let Some(evicted) = inner.flows.remove(&evicted_id) {
                    inner.indexes.remove(&evicted);
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> AppResult<Flow> {
        self.inner
            .lock()
            .unwrap()
            .flows
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("flow {id}")))
    }

    pub fn query(&self, filter: &FlowFilter, limit: usize, offset: usize) -> (Vec<Flow>, usize) {
        let inner = self.inner.lock().unwrap();
        let candidate_ids: Vec<&String> = if let Some(host) = &filter.host {
            inner.indexes.by_host.get(host).map(|v| v.iter().collect()).unwrap_or_default()
        } else if let Some(bucket) = &filter.status_bucket {
            inner.indexes.by_status_bucket.get(bucket.as_str()).map(|v| v.iter().collect()).unwrap_or_default()
        } else if let Some(udid) = &filter.device_udid {
            inner.indexes.by_udid.get(udid).map(|v| v.iter().collect()).unwrap_or_default()
        } else {
            inner.order.iter().collect()
        };

        let matched: Vec<&Flow> = candidate_ids
            .into_iter()
            .filter_map(|id| inner.flows.get(id))
            .filter(|f| filter.client_ip.as_deref().is_none_or(|ip| f.client_ip == ip))
            .collect();

        let total = matched.len();
        let page = matched.into_iter().rev().skip(offset).take(limit).cloned().collect();
        (page, total)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str, host: &str, status: u16) -> Flow {
        Flow {
            id: id.to_string(),
            timestamp: Utc::now(),
            client_ip: "127.0.0.1".into(),
            device_udid: None,
            request: FlowRequest {
                method: "GET".into(),
                url: format!("https://{host}/path"),
                headers: HashMap::new(),
                body: None,
                body_truncated: false,
            },
            response: Some(FlowResponse {
                status,
                headers: HashMap::new(),
                body: None,
                body_truncated: false,
            }),
            error: None,
            duration_ms: Some(10),
            source: FlowSource::Live,
        }
    }

    #[test]
    fn query_by_host_uses_index() {
        let store = FlowStore::new(100);
        store.insert(flow("1", "api.example.com", 200));
        store.insert(flow("2", "other.example.com", 200));
        let (page, total) = store.query(&FlowFilter { host: Some("api.example.com".into()), ..Default::default() }, 10, 0);
        assert_eq!(total, 1);
        assert_eq!(page[0].id, "1");
    }

    #[test]
    fn eviction_drops_oldest_past_capacity() {
        let store = FlowStore::new(2);
        store.insert(flow("1", "a.com", 200));
        store.insert(flow("2", "b.com", 200));
        store.insert(flow("3", "c.com", 200));
        assert_eq!(store.len(), 2);
        assert!(store.get("1").is_err());
    }

    #[test]
    fn truncate_body_flags_when_shortened() {
        let (body, truncated) = truncate_body(Some("x".repeat(100)), 10);
        assert!(truncated);
        assert_eq!(body.unwrap().len(), 10);
    }
}
