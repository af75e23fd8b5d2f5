//! Driving ports (Inbound API)

use crate::domain::{ClusterResult, Duty, Slot};
use crate::events::{DutyStartOutcome, NetworkMessage, RoutingOutcome};
use async_trait::async_trait;

/// Scheduler-facing API of a node's clusters
#[async_trait]
pub trait DutyApi: Send + Sync {
    /// Start every duty of the node for `slot`, grouped per cluster.
    ///
    /// One result per cluster named by the duties; failures in one cluster
    /// do not affect the others.
    async fn start_duties(
        &self,
        duties: Vec<Duty>,
        slot: Slot,
    ) -> ClusterResult<Vec<ClusterResult<DutyStartOutcome>>>;
}

/// Transport-facing API
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Route one inbound message.
    ///
    /// Identifier and routing problems come back as `RoutingOutcome::Dropped`;
    /// consensus and signature errors are returned as `Err`.
    async fn handle_message(&self, msg: NetworkMessage) -> ClusterResult<RoutingOutcome>;
}
