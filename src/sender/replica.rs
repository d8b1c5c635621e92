use super::payload::PendingPayload;
use super::transport::Transport;
use std::sync::Arc;

/// Duplicates every payload to a replica destination. The replica gets its
/// own copy after the primary has been handed the original, and nothing
/// about the replica outcome flows back.
#[derive(Clone)]
pub struct ReplicaFanout {
    primary: Arc<dyn Transport>,
    replica: Arc<dyn Transport>,
}

impl ReplicaFanout {
    pub fn new(primary: Arc<dyn Transport>, replica: Arc<dyn Transport>) -> Self {
        Self { primary, replica }
    }
}

impl Transport for ReplicaFanout {
    fn send(&self, payload: PendingPayload) {
        let copy = payload.clone();
        self.primary.send(payload);
        self.replica.send(copy);
    }
}
