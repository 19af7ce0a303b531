//! Proxy-to-log bridge (spec §4.G / §4.I): the proxy flow store calls
//! `emit_flow_summary` once a flow completes (or errors), turning it into
//! one `LogEntry` that flows through the same classify/dedup/ring pipeline
//! as every other source. The flow's full request/response stays in the
//! flow store; this is just the log-visible echo of it.

use super::Pipeline;
use crate::model::{Level, LogEntry, SourceTag};

pub struct FlowSummary<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error: Option<&'a str>,
}

pub fn emit_flow_summary(pipeline: &Pipeline, summary: FlowSummary<'_>) -> Option<u64> {
    let (level, message) = match summary.error {
        Some(err) => (Level::Error, format!("{} {} failed: {}", summary.method, summary.url, err)),
        None => {
            let status = summary.status.unwrap_or(0);
            let level = if status >= 500 {
                Level::Error
            } else if status >= 400 {
                Level::Warning
            } else {
                Level::Info
            };
            let duration = summary
                .duration_ms
                .map(|ms| format!(" in {ms}ms"))
                .unwrap_or_default();
            (level, format!("{} {} -> {}{}", summary.method, summary.url, status, duration))
        }
    };

    let entry = LogEntry::new(SourceTag::Proxy, None, level, "default", message);
    pipeline.emit(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Ring;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn server_error_flow_is_logged_as_error() {
        let ring = Arc::new(Ring::new(10));
        let pipeline = Pipeline::new(ring.clone(), Duration::from_secs(30));
        emit_flow_summary(
            &pipeline,
            FlowSummary {
                method: "GET",
                url: "https://api.example.com/v1/things",
                status: Some(503),
                duration_ms: Some(120),
                error: None,
            },
        );
        let page = ring.query(&Default::default(), 10, 0);
        assert_eq!(page.entries[0].level, Level::Error);
    }

    #[test]
    fn transport_error_flow_is_logged() {
        let ring = Arc::new(Ring::new(10));
        let pipeline = Pipeline::new(ring.clone(), Duration::from_secs(30));
        emit_flow_summary(
            &pipeline,
            FlowSummary {
                method: "GET",
                url: "https://api.example.com/v1/things",
                status: None,
                duration_ms: None,
                error: Some("connection reset"),
            },
        );
        let page = ring.query(&Default::default(), 10, 0);
        assert!(page.entries[0].message.contains("connection reset"));
    }
}
