//! Component E — summarizer (spec §4.E).
//!
//! Cursor-delta digests over the ring (and, mirrored, over the flow
//! store). Everything here is template-composed text, never a model call.

use crate::model::{decode_cursor, encode_cursor, LogEntry};
use crate::ring::{LogFilter, Ring};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum Window {
    ThirtySec,
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
}

impl Window {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "30s" => Some(Window::ThirtySec),
            "1m" => Some(Window::OneMin),
            "5m" => Some(Window::FiveMin),
            "15m" => Some(Window::FifteenMin),
            "1h" => Some(Window::OneHour),
            _ => None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            Window::ThirtySec => chrono::Duration::seconds(30),
            Window::OneMin => chrono::Duration::minutes(1),
            Window::FiveMin => chrono::Duration::minutes(5),
            Window::FifteenMin => chrono::Duration::minutes(15),
            Window::OneHour => chrono::Duration::hours(1),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogSummary {
    pub counts_by_level: HashMap<String, u64>,
    pub counts_by_process: HashMap<String, u64>,
    pub top_recurring: Vec<TopMessage>,
    pub top_errors: Vec<TopMessage>,
    pub narrative: String,
    pub cursor: String,
}

#[derive(Debug, Serialize)]
pub struct TopMessage {
    pub fingerprint: String,
    pub message: String,
    pub count: u64,
}

/// Summarize log activity in `window`, optionally restricted to entries
/// strictly after `since_cursor`. The returned cursor always advances to
/// (at least) the current ring head.
pub fn summarize_logs(ring: &Ring, window: Window, process: Option<&str>, since_cursor: Option<&str>) -> LogSummary {
    let now = chrono::Utc::now();
    let window_start = now - window.duration();
    let since_seq = since_cursor.and_then(decode_cursor).unwrap_or(0);

    let mut filter = LogFilter {
        since: Some(window_start),
        ..Default::default()
    };
    if let Some(p) = process {
        filter.process = Some(p.to_string());
    }

    let page = ring.query(&filter, usize::MAX, 0);
    let entries: Vec<&LogEntry> = page
        .entries
        .iter()
        .filter(|e| e.seq > since_seq)
        .collect();

    let mut counts_by_level: HashMap<String, u64> = HashMap::new();
    let mut counts_by_process: HashMap<String, u64> = HashMap::new();
    let mut by_fingerprint: HashMap<u64, (String, u64)> = HashMap::new();
    let mut errors: HashMap<u64, (String, u64)> = HashMap::new();

    for e in &entries {
        *counts_by_level.entry(format!("{:?}", e.level).to_lowercase()).or_insert(0) += 1;
        if let Some(p) = &e.process {
            *counts_by_process.entry(p.clone()).or_insert(0) += 1;
        }
        let slot = by_fingerprint.entry(e.fingerprint).or_insert((e.message.clone(), 0));
        slot.1 += e.count;

        if e.level >= crate::model::Level::Error {
            let slot = errors.entry(e.fingerprint).or_insert((e.message.clone(), 0));
            slot.1 += e.count;
        }
    }

    let top_recurring = top_k(&by_fingerprint, 5);
    let top_errors = top_k(&errors, 5);

    let cursor = encode_cursor(ring.current_seq().max(since_seq));
    let narrative = narrate(&entries, &counts_by_level, window);

    LogSummary {
        counts_by_level,
        counts_by_process,
        top_recurring,
        top_errors,
        narrative,
        cursor,
    }
}

fn top_k(map: &HashMap<u64, (String, u64)>, k: usize) -> Vec<TopMessage> {
    let mut v: Vec<_> = map
        .iter()
        .map(|(fp, (msg, count))| TopMessage {
            fingerprint: format!("{fp:016x}"),
            message: msg.clone(),
            count: *count,
        })
        .collect();
    v.sort_by(|a, b| b.count.cmp(&a.count));
    v.truncate(k);
    v
}

fn narrate(entries: &[&LogEntry], counts_by_level: &HashMap<String, u64>, window: Window) -> String {
    if entries.is_empty() {
        return format!("No activity in the last {}.", window_label(window));
    }
    let errors = counts_by_level.get("error").copied().unwrap_or(0)
        + counts_by_level.get("fault").copied().unwrap_or(0);
    let warnings = counts_by_level.get("warning").copied().unwrap_or(0);
    if errors > 0 {
        format!(
            "{} log lines in the last {}, including {} error(s) and {} warning(s).",
            entries.len(), window_label(window), errors, warnings
        )
    } else {
        format!("{} log lines in the last {}; no errors observed.", entries.len(), window_label(window))
    }
}

fn window_label(window: Window) -> &'static str {
    match window {
        Window::ThirtySec => "30 seconds",
        Window::OneMin => "minute",
        Window::FiveMin => "5 minutes",
        Window::FifteenMin => "15 minutes",
        Window::OneHour => "hour",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Level, SourceTag};

    #[test]
    fn cursor_delta_only_counts_new_entries() {
        let ring = Ring::new(100);
        for i in 0..10 {
            ring.append(LogEntry::new(SourceTag::Syslog, None, Level::Info, "default", format!("line {i}")));
        }
        let s1 = summarize_logs(&ring, Window::FiveMin, None, None);
        let total1: u64 = s1.counts_by_level.values().sum();
        assert_eq!(total1, 10);

        for i in 10..13 {
            ring.append(LogEntry::new(SourceTag::Syslog, None, Level::Info, "default", format!("line {i}")));
        }
        let s2 = summarize_logs(&ring, Window::FiveMin, None, Some(&s1.cursor));
        let total2: u64 = s2.counts_by_level.values().sum();
        assert_eq!(total2, 3);
        assert!(decode_cursor(&s2.cursor).unwrap() > decode_cursor(&s1.cursor).unwrap());
    }

    #[test]
    fn empty_window_produces_no_activity_narrative() {
        let ring = Ring::new(10);
        let s = summarize_logs(&ring, Window::ThirtySec, None, None);
        assert!(s.narrative.contains("No activity"));
    }
}
