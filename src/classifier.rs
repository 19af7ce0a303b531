//! Component D — classifier & deduplicator (spec §4.D).
//!
//! The classifier maps raw entries to a level/category using ordered
//! pattern rules, first match wins. The deduplicator maintains a bounded
//! rolling map from fingerprint to (first_seen, last_seen, count) over a
//! sliding window; repeats increment the stored entry's count instead of
//! appending, and are only republished when the count crosses a power of
//! two, so the ring keeps seeing the first occurrence and occasional
//! "this keeps happening" pulses rather than a flood.

use crate::model::{LogEntry, Level, SourceTag};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct ClassifyRule {
    pub sources: Option<Vec<SourceTag>>,
    pub processes: Option<Vec<&'static str>>,
    pub pattern: Regex,
    pub level: Level,
    pub category: &'static str,
}

/// Ordered, first-match-wins rules covering the non-exhaustive category
/// list in spec §4.D.
pub fn default_rules() -> Vec<ClassifyRule> {
    let rule = |pattern: &str, level: Level, category: &'static str| ClassifyRule {
        sources: None,
        processes: None,
        pattern: Regex::new(pattern).expect("valid classifier regex"),
        level,
        category,
    };
    vec![
        rule(r"(?i)sandbox.*deny|deny.*sandbox", Level::Error, "sandbox-violation"),
        rule(r"(?i)code.?sign(ing)?.*(invalid|fail)", Level::Error, "code-signing"),
        rule(r"(?i)unable to simultaneously satisfy constraints|autolayout", Level::Warning, "autolayout-conflict"),
        rule(r"(?i)received memory warning|low memory", Level::Warning, "memory-warning"),
        rule(r"(?i)tls|ssl handshake fail|certificate.*(invalid|expired)", Level::Error, "tls-failure"),
        rule(r"(?i)core.?data.*(error|conflict)", Level::Error, "coredata-error"),
    ]
}

/// Apply the first matching rule; unmatched entries keep their
/// source-provided level and no category.
pub fn classify(rules: &[ClassifyRule], entry: &mut LogEntry) {
    for rule in rules {
        if let Some(sources) = &rule.sources {
            if !sources.contains(&entry.source) {
                continue;
            }
        }
        if let Some(processes) = &rule.processes {
            let matches_process = entry
                .process
                .as_deref()
                .map(|p| processes.contains(&p))
                .unwrap_or(false);
            if !matches_process {
                continue;
            }
        }
        if rule.pattern.is_match(&entry.message) {
            entry.level = rule.level;
            entry.category = Some(rule.category.to_string());
            return;
        }
    }
}

struct DedupSlot {
    first_seen: Instant,
    last_seen: Instant,
    count: u64,
    /// Highest power of two already republished (0 if never republished).
    last_published_at: u64,
    /// Seq of the ring entry currently representing this fingerprint, so
    /// a republish can be seen as "the same line, updated count" by callers
    /// that track by fingerprint.
    ring_seq: u64,
}

/// Bounded rolling map keyed by fingerprint, pruned lazily on access.
pub struct Deduplicator {
    window: Duration,
    slots: Mutex<HashMap<u64, DedupSlot>>,
}

pub enum DedupOutcome {
    /// First occurrence within the window: append to the ring.
    FirstSeen,
    /// A repeat that doesn't cross a power-of-two threshold: suppressed,
    /// only the stored count is bumped.
    Suppressed { count: u64 },
    /// A repeat whose count just crossed a power of two: republish with
    /// the running count so visibility isn't lost under load.
    Republish { count: u64 },
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn prune(slots: &mut HashMap<u64, DedupSlot>, window: Duration, now: Instant) {
        slots.retain(|_, slot| now.duration_since(slot.last_seen) < window);
    }

    /// Record an occurrence of `fingerprint`. `ring_seq` is filled in by
    /// the caller after a `FirstSeen` append so later repeats can be
    /// correlated back to it if needed.
    pub fn observe(&self, fingerprint: u64) -> DedupOutcome {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        Self::prune(&mut slots, self.window, now);

        match slots.get_mut(&fingerprint) {
            None => {
                slots.insert(
                    fingerprint,
                    DedupSlot {
                        first_seen: now,
                        last_seen: now,
                        count: 1,
                        last_published_at: 1,
                        ring_seq: 0,
                    },
                );
                DedupOutcome::FirstSeen
            }
            Some(slot) => {
                slot.last_seen = now;
                slot.count += 1;
                if slot.count.is_power_of_two() && slot.count > slot.last_published_at {
                    slot.last_published_at = slot.count;
                    DedupOutcome::Republish { count: slot.count }
                } else {
                    DedupOutcome::Suppressed { count: slot.count }
                }
            }
        }
    }

    pub fn set_ring_seq(&self, fingerprint: u64, seq: u64) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(&fingerprint) {
            slot.ring_seq = seq;
        }
    }

    #[cfg(test)]
    fn count_of(&self, fingerprint: u64) -> Option<u64> {
        self.slots.lock().unwrap().get(&fingerprint).map(|s| s.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fingerprint;

    #[test]
    fn classifier_tags_sandbox_violation() {
        let rules = default_rules();
        let mut e = LogEntry::new(SourceTag::Syslog, None, Level::Info, "default", "Sandbox: deny file-read-data");
        classify(&rules, &mut e);
        assert_eq!(e.category.as_deref(), Some("sandbox-violation"));
        assert_eq!(e.level, Level::Error);
    }

    #[test]
    fn classifier_leaves_unmatched_entries_alone() {
        let rules = default_rules();
        let mut e = LogEntry::new(SourceTag::Syslog, None, Level::Info, "default", "just a normal line");
        classify(&rules, &mut e);
        assert!(e.category.is_none());
        assert_eq!(e.level, Level::Info);
    }

    #[test]
    fn dedup_first_occurrence_then_suppresses() {
        let dedup = Deduplicator::new(Duration::from_secs(30));
        let fp = fingerprint(Level::Info, Some("p"), "hello");
        assert!(matches!(dedup.observe(fp), DedupOutcome::FirstSeen));
        assert!(matches!(dedup.observe(fp), DedupOutcome::Suppressed { count: 2 }));
    }

    #[test]
    fn dedup_republishes_on_power_of_two() {
        let dedup = Deduplicator::new(Duration::from_secs(30));
        let fp = fingerprint(Level::Info, Some("p"), "hello");
        dedup.observe(fp); // 1 (FirstSeen)
        dedup.observe(fp); // 2 -> republish
        let outcome = dedup.observe(fp); // 3 -> suppressed
        assert!(matches!(outcome, DedupOutcome::Suppressed { count: 3 }));
        assert_eq!(dedup.count_of(fp), Some(3));
    }

    #[test]
    fn dedup_never_loses_first_occurrence() {
        let dedup = Deduplicator::new(Duration::from_secs(30));
        let fp = fingerprint(Level::Info, Some("p"), "hello");
        let first = dedup.observe(fp);
        assert!(matches!(first, DedupOutcome::FirstSeen));
    }
}
