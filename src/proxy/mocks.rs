//! Mock rules: canned responses served without ever reaching the real
//! server. Evaluated before intercept rules (spec §4.I), in registration
//! order, first match wins; order is stable across CRUD so a client that
//! edits one rule doesn't silently reorder the others.

use super::FlowResponse;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub type MockRuleId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRule {
    pub id: MockRuleId,
    pub host_pattern: String,
    pub method: Option<String>,
    pub path_pattern: Option<String>,
    pub response: FlowResponse,
}

impl MockRule {
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

pub struct MockRegistry {
    rules: Mutex<Vec<MockRule>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self { rules: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, rule: MockRule) {
        self.rules.lock().unwrap().push(rule);
    }

    /// Update in place, preserving position in the evaluation order.
    pub fn update(&self, id: &str, rule: MockRule) -> bool {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter().position(|r| r.id == id) {
            Some(idx) => {
                rules[idx] = rule;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }

    pub fn list(&self) -> Vec<MockRule> {
        self.rules.lock().unwrap().clone()
    }

    pub fn matching(&self, method: &str, host: &str, path: &str) -> Option<MockRule> {
        self.rules.lock().unwrap().iter().find(|r| r.matches(method, host, path)).cloned()
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn rule(id: &str, host: &str) -> MockRule {
        MockRule {
            id: id.to_string(),
            host_pattern: host.to_string(),
            method: None,
            path_pattern: None,
            response: FlowResponse { status: 200, headers: HashMap::new(), body: None, body_truncated: false },
        }
    }

    #[test]
    fn first_registered_match_wins() {
        let registry = MockRegistry::new();
        registry.add(rule("a", "example.com"));
        registry.add(rule("b", "example.com"));
        let matched = registry.matching("GET", "example.com", "/x").unwrap();
        assert_eq!(matched.id, "a");
    }

    #[test]
    fn update_preserves_position() {
        let registry = MockRegistry::new();
        registry.add(rule("a", "one.com"));
        registry.add(rule("b", "two.com"));
        registry.update("a", rule("a", "changed.com"));
        let ids: Vec<_> = registry.list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.list()[0].host_pattern, "changed.com");
    }
}
