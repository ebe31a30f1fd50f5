//! Orchestrator tunables.
//!
//! File parsing is an external concern; gateways construct a
//! [`CoreConfig`] however they load their settings.

use lattice_types::GatewayId;
use std::time::Duration;

/// Configuration for one orchestrator instance.
///
/// # Example
///
/// ```
/// use lattice_runtime::CoreConfig;
/// use std::time::Duration;
///
/// let config = CoreConfig::new("gw-main")
///     .with_cleanup_interval(Duration::from_secs(600));
/// assert_eq!(config.gateway_id.as_str(), "gw-main");
/// ```
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// The gateway this orchestrator runs on.
    pub gateway_id: GatewayId,
    /// How often terminal tasks are swept out.
    pub cleanup_interval: Duration,
    /// Age past which a terminal task is swept.
    pub cleanup_max_age: Duration,
    /// How often local agents are re-announced to the mesh.
    pub announce_interval: Duration,
}

impl CoreConfig {
    /// Defaults: hourly cleanup, 24 h retention, announce every minute.
    #[must_use]
    pub fn new(gateway_id: impl Into<GatewayId>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            cleanup_interval: Duration::from_secs(60 * 60),
            cleanup_max_age: Duration::from_secs(24 * 60 * 60),
            announce_interval: Duration::from_secs(60),
        }
    }

    /// Overrides the cleanup sweep interval.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Overrides the terminal-task retention age.
    #[must_use]
    pub fn with_cleanup_max_age(mut self, max_age: Duration) -> Self {
        self.cleanup_max_age = max_age;
        self
    }

    /// Overrides the announce interval.
    #[must_use]
    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoreConfig::new("gw");
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.cleanup_max_age, Duration::from_secs(86_400));
        assert_eq!(config.announce_interval, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides() {
        let config = CoreConfig::new("gw")
            .with_cleanup_interval(Duration::from_secs(1))
            .with_cleanup_max_age(Duration::from_secs(2))
            .with_announce_interval(Duration::from_secs(3));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
        assert_eq!(config.cleanup_max_age, Duration::from_secs(2));
        assert_eq!(config.announce_interval, Duration::from_secs(3));
    }
}
