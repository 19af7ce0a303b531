//! Component C — ring buffer (spec §4.C).
//!
//! Fixed-capacity FIFO of `LogEntry`. One or more producers append;
//! many concurrent readers query or subscribe. The ring never blocks a
//! producer on a slow subscriber — subscribers get a bounded channel and
//! are dropped (with one "lagged" notice) if they fall behind.

use crate::model::{Level, LogEntry, SourceTag};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Sent to subscribers; `Lagged` is surfaced once before the subscription
/// dies, so clients know to reconnect with a cursor.
#[derive(Debug, Clone)]
pub enum RingEvent {
    Entry(LogEntry),
    Lagged,
}

#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub source: Option<SourceTag>,
    pub process: Option<String>,
    pub min_level: Option<Level>,
    pub search: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
}

impl LogFilter {
    fn matches(&self, e: &LogEntry) -> bool {
        if let Some(source) = self.source {
            if e.source != source {
                return false;
            }
        }
        if let Some(process) = &self.process {
            if e.process.as_deref() != Some(process.as_str()) {
                return false;
            }
        }
        if let Some(min_level) = self.min_level {
            if e.level < min_level {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !e.message.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if e.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if e.timestamp > until {
                return false;
            }
        }
        true
    }
}

pub struct Page {
    pub entries: Vec<LogEntry>,
    pub total: usize,
}

struct Inner {
    capacity: usize,
    next_seq: u64,
    /// Lowest sequence number still present (entries below it were
    /// dropped on overflow).
    floor_seq: u64,
    entries: VecDeque<LogEntry>,
}

pub struct Ring {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<RingEvent>,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner {
                capacity,
                next_seq: 1,
                floor_seq: 1,
                entries: VecDeque::with_capacity(capacity),
            }),
            tx,
        }
    }

    /// Append an entry, assigning it the next monotonic sequence number.
    /// Drops the oldest entry if the ring is at capacity.
    pub fn append(&self, mut entry: LogEntry) -> u64 {
        let seq = {
            let mut inner = self.inner.lock().unwrap();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            entry.seq = seq;
            if inner.entries.len() >= inner.capacity {
                inner.entries.pop_front();
                inner.floor_seq += 1;
            }
            inner.entries.push_back(entry.clone());
            seq
        };
        // A subscriber overflow on this bounded channel just means a slow
        // reader missed an event; broadcast::Receiver surfaces that as a
        // RecvError::Lagged on its own, so we don't need to detect it here.
        let _ = self.tx.send(RingEvent::Entry(entry));
        seq
    }

    pub fn query(&self, filter: &LogFilter, limit: usize, offset: usize) -> Page {
        let inner = self.inner.lock().unwrap();
        let matched: Vec<&LogEntry> = inner.entries.iter().filter(|e| filter.matches(e)).collect();
        let total = matched.len();
        let entries = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Page { entries, total }
    }

    /// All entries with `seq > since`, in insertion order.
    pub fn since(&self, since: u64) -> Vec<LogEntry> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }

    pub fn current_seq(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.next_seq.saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to future entries. Replay-with-cursor: if `replay_since`
    /// is set, entries still in the ring after it are drained before the
    /// live feed is consumed, per the open question in spec §9 (resolved:
    /// subscribe-with-optional-cursor).
    pub fn subscribe(&self, replay_since: Option<u64>) -> (Vec<LogEntry>, broadcast::Receiver<RingEvent>) {
        let rx = self.tx.subscribe();
        let replay = match replay_since {
            Some(since) => self.since(since),
            None => Vec::new(),
        };
        (replay, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(msg: &str) -> LogEntry {
        LogEntry::new(SourceTag::Syslog, Some("p".into()), Level::Info, "default", msg)
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let ring = Ring::new(10);
        let s1 = ring.append(mk("a"));
        let s2 = ring.append(mk("b"));
        assert!(s2 > s1);
    }

    #[test]
    fn overflow_drops_eldest_without_reuse() {
        let ring = Ring::new(4);
        for c in ["a", "b", "c", "d", "e"] {
            ring.append(mk(c));
        }
        let page = ring.query(&LogFilter::default(), 10, 0);
        let msgs: Vec<_> = page.entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["b", "c", "d", "e"]);
        // dropped "a" had seq 1; it must never reappear
        assert!(page.entries.iter().all(|e| e.seq != 1));
    }

    #[test]
    fn offset_past_population_is_empty_not_error() {
        let ring = Ring::new(4);
        ring.append(mk("a"));
        let page = ring.query(&LogFilter::default(), 10, 50);
        assert!(page.entries.is_empty());
        assert_eq!(page.total, 1);
    }

    #[test]
    fn since_returns_only_strictly_later_entries() {
        let ring = Ring::new(10);
        let s1 = ring.append(mk("a"));
        ring.append(mk("b"));
        let later = ring.since(s1);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].message, "b");
    }

    #[test]
    fn query_is_insertion_ordered() {
        let ring = Ring::new(10);
        for c in ["x", "y", "z"] {
            ring.append(mk(c));
        }
        let page = ring.query(&LogFilter::default(), 10, 0);
        let msgs: Vec<_> = page.entries.iter().map(|e| e.message.clone()).collect();
        assert_eq!(msgs, vec!["x", "y", "z"]);
    }
}
