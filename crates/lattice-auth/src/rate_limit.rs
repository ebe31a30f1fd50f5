//! Per-agent message rate limiting.
//!
//! Fixed 60-second windows, reset lazily on the next check after the
//! window lapses. State is one `{window_start, count}` pair per agent;
//! entries for removed agents are dropped via [`RateLimiter::forget`].

use lattice_types::AgentConfigId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Window length for all agents.
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Sliding-window counter per agent.
///
/// The limiter itself carries no budgets; the caller passes the
/// policy's `max_messages_per_minute` on each check so that policy
/// updates take effect immediately.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<AgentConfigId, Window>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one message for `agent_id` and returns whether it fits
    /// the `limit` for the current window.
    ///
    /// The first check after a window lapses resets the counter.
    pub fn check(&mut self, agent_id: &AgentConfigId, limit: u32) -> bool {
        self.check_at(agent_id, limit, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock, for tests.
    pub fn check_at(&mut self, agent_id: &AgentConfigId, limit: u32, now: Instant) -> bool {
        let window = self
            .windows
            .entry(agent_id.clone())
            .or_insert_with(|| Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) > WINDOW {
            window.started = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        window.count <= limit
    }

    /// The count consumed in the current window, if one exists.
    #[must_use]
    pub fn current_count(&self, agent_id: &AgentConfigId) -> Option<u32> {
        self.windows.get(agent_id).map(|w| w.count)
    }

    /// Drops window state for an agent (e.g. on unregister).
    pub fn forget(&mut self, agent_id: &AgentConfigId) {
        self.windows.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentConfigId {
        AgentConfigId::new(id)
    }

    #[test]
    fn allows_up_to_limit() {
        let mut limiter = RateLimiter::new();
        let a = agent("a");

        assert!(limiter.check(&a, 3));
        assert!(limiter.check(&a, 3));
        assert!(limiter.check(&a, 3));
        assert!(!limiter.check(&a, 3));
        assert_eq!(limiter.current_count(&a), Some(4));
    }

    #[test]
    fn windows_are_per_agent() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.check(&agent("a"), 1));
        assert!(!limiter.check(&agent("a"), 1));
        // b has its own window
        assert!(limiter.check(&agent("b"), 1));
    }

    #[test]
    fn window_resets_after_sixty_seconds() {
        let mut limiter = RateLimiter::new();
        let a = agent("a");
        let start = Instant::now();

        assert!(limiter.check_at(&a, 1, start));
        assert!(!limiter.check_at(&a, 1, start + Duration::from_secs(59)));

        // just past the window: counter resets lazily
        assert!(limiter.check_at(&a, 1, start + Duration::from_secs(61)));
    }

    #[test]
    fn forget_clears_state() {
        let mut limiter = RateLimiter::new();
        let a = agent("a");
        assert!(limiter.check(&a, 1));
        limiter.forget(&a);
        assert_eq!(limiter.current_count(&a), None);
        assert!(limiter.check(&a, 1));
    }
}
