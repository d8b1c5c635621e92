use crate::domain::TelemetryError;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

/// Self-monitoring sink. Implementations must never panic or block.
#[cfg_attr(test, automock)]
pub trait Monitor: Send + Sync {
    fn report(&self, error: &TelemetryError);
}

/// Default monitor: forwards every report to the agent's own log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn report(&self, error: &TelemetryError) {
        warn!(kind = %error.kind(), "{}", error);
    }
}

/// Monitor for replica delivery. Replica failures are observability only and
/// stay out of the primary reporting path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaMonitor;

impl Monitor for ReplicaMonitor {
    fn report(&self, error: &TelemetryError) {
        debug!(kind = %error.kind(), "replica: {}", error);
    }
}
