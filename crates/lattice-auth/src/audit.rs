//! Bounded audit log.
//!
//! A rolling buffer of security-relevant decisions (permission checks,
//! rate-limit denials, authorization verdicts). Unlike tracing output,
//! the audit log is queryable after the fact, newest-last.
//!
//! # Retention
//!
//! Capacity is [`AUDIT_LOG_CAPACITY`] entries. When an append pushes the
//! log past capacity, the oldest 20% are trimmed. The trim runs as a
//! spawned task when a tokio runtime is available and inline otherwise;
//! an atomic pending flag keeps at most one trim in flight during
//! bursts.

use chrono::{DateTime, Utc};
use lattice_types::AgentConfigId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Maximum retained audit entries.
pub const AUDIT_LOG_CAPACITY: usize = 10_000;

/// Fraction of capacity removed per trim, as a divisor (5 ⇒ 20%).
const TRIM_DIVISOR: usize = 5;

/// One recorded security decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// The agent the decision concerned.
    pub agent_id: AgentConfigId,
    /// Decision kind, e.g. `permission.check:task.assign` or
    /// `rate-limit.exceeded`.
    pub action: String,
    /// Structured context (counts, reasons).
    pub detail: serde_json::Value,
    /// Whether the checked operation was allowed.
    pub allowed: bool,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn now(
        agent_id: impl Into<AgentConfigId>,
        action: impl Into<String>,
        detail: serde_json::Value,
        allowed: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            action: action.into(),
            detail,
            allowed,
        }
    }
}

/// Rolling buffer of [`AuditEntry`] values.
///
/// Cheap to clone: clones share the same underlying buffer, which is
/// what lets the spawned trim task reach it.
#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: Arc<Mutex<VecDeque<AuditEntry>>>,
    trim_pending: Arc<AtomicBool>,
    capacity: usize,
}

impl AuditLog {
    /// Creates a log with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(AUDIT_LOG_CAPACITY)
    }

    /// Creates a log with a custom capacity (minimum 1; useful in tests).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            trim_pending: Arc::new(AtomicBool::new(false)),
            capacity: capacity.max(1),
        }
    }

    /// Appends an entry, scheduling a trim if the log ran past capacity.
    pub fn record(&self, entry: AuditEntry) {
        let over_capacity = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            entries.len() > self.capacity
        };

        if over_capacity && !self.trim_pending.swap(true, Ordering::SeqCst) {
            let entries = Arc::clone(&self.entries);
            let pending = Arc::clone(&self.trim_pending);
            let trim_count = (self.capacity / TRIM_DIVISOR).max(1);

            let trim = move || {
                let mut entries = entries.lock();
                let n = trim_count.min(entries.len());
                entries.drain(..n);
                pending.store(false, Ordering::SeqCst);
            };

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { trim() });
                }
                Err(_) => trim(),
            }
        }
    }

    /// The most recent `limit` entries, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// The most recent `limit` entries for one agent, oldest first.
    #[must_use]
    pub fn for_agent(&self, agent_id: &AgentConfigId, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let mut matched: Vec<AuditEntry> = entries
            .iter()
            .rev()
            .filter(|e| &e.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(agent: &str, action: &str) -> AuditEntry {
        AuditEntry::now(agent, action, json!({}), true)
    }

    #[test]
    fn record_and_recent() {
        let log = AuditLog::new();
        log.record(entry("a", "permission.check:task.assign"));
        log.record(entry("b", "rate-limit.exceeded"));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].agent_id.as_str(), "a");
        assert_eq!(recent[1].agent_id.as_str(), "b");
    }

    #[test]
    fn recent_respects_limit() {
        let log = AuditLog::new();
        for i in 0..5 {
            log.record(entry("a", &format!("action-{i}")));
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "action-3");
        assert_eq!(recent[1].action, "action-4");
    }

    #[test]
    fn for_agent_filters_and_orders() {
        let log = AuditLog::new();
        log.record(entry("a", "first"));
        log.record(entry("b", "other"));
        log.record(entry("a", "second"));

        let for_a = log.for_agent(&AgentConfigId::new("a"), 10);
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].action, "first");
        assert_eq!(for_a[1].action, "second");
    }

    #[test]
    fn overflow_trims_oldest_fifth() {
        // no tokio runtime here, so the trim runs inline
        let log = AuditLog::with_capacity(100);
        for i in 0..101 {
            log.record(entry("a", &format!("action-{i}")));
        }

        // 101 entries tripped the trim: 20 oldest dropped
        assert_eq!(log.len(), 81);
        let recent = log.recent(usize::MAX);
        assert_eq!(recent[0].action, "action-20");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overflow_trims_on_runtime() {
        let log = AuditLog::with_capacity(50);
        for i in 0..51 {
            log.record(entry("a", &format!("action-{i}")));
        }

        // spawned trim; poll until it lands
        for _ in 0..100 {
            if log.len() <= 41 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(log.len(), 41);
    }
}
