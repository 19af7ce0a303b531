//! Intercept rules: hold matching in-flight flows for manual
//! inspection/modification before they're released to continue toward the
//! real server. Held flows auto-release after a timeout so a client that
//! never checks back doesn't wedge the proxy open indefinitely.

use super::FlowRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

pub type InterceptRuleId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptRule {
    pub id: InterceptRuleId,
    pub host_pattern: String,
    pub method: Option<String>,
    pub path_pattern: Option<String>,
}

impl InterceptRule {
    pub fn matches(&self, method: &str, host: &str, path: &str) -> bool {
        if let Some(want) = &self.method {
            if !want.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if !host.contains(&self.host_pattern) {
            return false;
        }
        if let Some(pattern) = &self.path_pattern {
            if !path.contains(pattern.as_str()) {
                return false;
            }
        }
        true
    }
}

/// What to do with a held flow: pass it through unchanged, or substitute
/// a modified request/response before it continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReleaseDecision {
    PassThrough,
    Modify { request: Option<FlowRequest> },
}

pub struct HeldFlow {
    pub flow_id: String,
    pub rule_id: InterceptRuleId,
    pub held_at: DateTime<Utc>,
    pub request: FlowRequest,
    release_tx: Option<oneshot::Sender<ReleaseDecision>>,
}

/// Queue of flows currently paused on an intercept rule, keyed by flow id.
pub struct InterceptRegistry {
    rules: Mutex<Vec<InterceptRule>>,
    held: Mutex<HashMap<String, HeldFlow>>,
    default_timeout: Duration,
}

impl InterceptRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            held: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn add_rule(&self, rule: InterceptRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }

    pub fn list_rules(&self) -> Vec<InterceptRule> {
        self.rules.lock().unwrap().clone()
    }

    /// Find the first rule (in registration order) matching this request,
    /// per spec's "mock rules are evaluated before intercept rules" (the
    /// caller checks mocks first; this registry only knows about holds).
    pub fn matching_rule(&self, method: &str, host: &str, path: &str) -> Option<InterceptRule> {
        self.rules.lock().unwrap().iter().find(|r| r.matches(method, host, path)).cloned()
    }

    /// Register a held flow and return a receiver that resolves when the
    /// flow is released (manually, or by the timeout task below).
    pub fn hold(&self, flow_id: String, rule_id: InterceptRuleId, request: FlowRequest) -> oneshot::Receiver<ReleaseDecision> {
        let (tx, rx) = oneshot::channel();
        self.held.lock().unwrap().insert(
            flow_id.clone(),
            HeldFlow {
                flow_id,
                rule_id,
                held_at: Utc::now(),
                request,
                release_tx: Some(tx),
            },
        );
        rx
    }

    pub fn list_held(&self) -> Vec<(String, InterceptRuleId, DateTime<Utc>)> {
        self.held
            .lock()
            .unwrap()
            .values()
            .map(|h| (h.flow_id.clone(), h.rule_id.clone(), h.held_at))
            .collect()
    }

    /// Release a held flow with an explicit decision. Returns false if the
    /// flow wasn't held (already released, or unknown id).
    pub fn release(&self, flow_id: &str, decision: ReleaseDecision) -> bool {
        let Some(mut held) = self.held.lock().unwrap().remove(flow_id) else {
            return false;
        };
        if let Some(tx) = held.release_tx.take() {
            let _ = tx.send(decision);
        }
        true
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Auto-release any flow held past its deadline, pass-through (per
    /// spec's auto-release-unmodified policy).
    pub fn release_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .held
            .lock()
            .unwrap()
            .values()
            .filter(|h| now.signed_duration_since(h.held_at) > chrono::Duration::from_std(self.default_timeout).unwrap())
            .map(|h| h.flow_id.clone())
            .collect();
        for id in &expired {
            self.release(id, ReleaseDecision::PassThrough);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_matches_host_substring() {
        let rule = InterceptRule {
            id: "r1".into(),
            host_pattern: "api.example.com".into(),
            method: Some("POST".into()),
            path_pattern: None,
        };
        assert!(rule.matches("POST", "api.example.com", "/v1/x"));
        assert!(!rule.matches("GET", "api.example.com", "/v1/x"));
        assert!(!rule.matches("POST", "other.com", "/v1/x"));
    }

    #[test]
    fn hold_then_release_resolves_receiver() {
        let registry = InterceptRegistry::new(Duration::from_secs(30));
        let request = FlowRequest {
            method: "GET".into(),
            url: "https://api.example.com/x".into(),
            headers: HashMap::new(),
            body: None,
            body_truncated: false,
        };
        let rx = registry.hold("flow-1".into(), "r1".into(), request);
        assert!(registry.release("flow-1", ReleaseDecision::PassThrough));
        assert!(matches!(rx.try_recv(), Ok(ReleaseDecision::PassThrough)));
    }

    #[test]
    fn release_unknown_flow_is_false() {
        let registry = InterceptRegistry::new(Duration::from_secs(30));
        assert!(!registry.release("nope", ReleaseDecision::PassThrough));
    }
}
