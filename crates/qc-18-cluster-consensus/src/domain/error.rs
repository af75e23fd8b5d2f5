//! Error types for the cluster consensus subsystem
//!
//! Every condition here is scoped to a single message or duty. None of them
//! is fatal to the node, and none may corrupt the state of another cluster or
//! another validator's runner.

use super::{ClusterId, OperatorId, Recipient, Slot};

/// Cluster consensus error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed message id: {0}")]
    MalformedMessageId(String),

    #[error("Stale slot {slot}: highest handled slot is {highest}")]
    StaleSlot { slot: Slot, highest: Slot },

    #[error("Slot {0} already decided")]
    AlreadyDecided(Slot),

    #[error("No running consensus instance for slot {0}")]
    NoRunningInstance(Slot),

    #[error("Proposed value rejected: {0}")]
    ValueRejected(String),

    #[error("Invalid partial signature from operator {signer}: {reason}")]
    InvalidPartialSignature { signer: OperatorId, reason: String },

    #[error("Operator {signer} is not a member of {recipient}")]
    UnknownSigner {
        signer: OperatorId,
        recipient: Recipient,
    },

    #[error("No active duty for slot {0}")]
    NoActiveDuty(Slot),

    #[error("Conflicting decided value for slot {0}")]
    ConflictingDecision(Slot),

    #[error("Unroutable message: {0}")]
    UnroutableMessage(String),

    #[error("No duties for slot {0}")]
    NoDuties(Slot),

    #[error("Cluster {cluster} exceeded {limit} attestation duties in epoch {epoch}")]
    RateLimited {
        cluster: ClusterId,
        epoch: u64,
        limit: u64,
    },

    #[error("Beacon node error: {0}")]
    BeaconNode(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Agreement engine error: {0}")]
    Engine(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl ClusterError {
    /// Whether the error was caused by the sending peer, so the transport
    /// may apply its scoring policy.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            ClusterError::MalformedMessageId(_)
                | ClusterError::InvalidPartialSignature { .. }
                | ClusterError::UnknownSigner { .. }
                | ClusterError::Codec(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ClusterError::InvalidInput(_) => "invalid_input",
            ClusterError::MalformedMessageId(_) => "malformed_message_id",
            ClusterError::StaleSlot { .. } => "stale_slot",
            ClusterError::AlreadyDecided(_) => "already_decided",
            ClusterError::NoRunningInstance(_) => "no_running_instance",
            ClusterError::ValueRejected(_) => "value_rejected",
            ClusterError::InvalidPartialSignature { .. } => "invalid_partial_signature",
            ClusterError::UnknownSigner { .. } => "unknown_signer",
            ClusterError::NoActiveDuty(_) => "no_active_duty",
            ClusterError::ConflictingDecision(_) => "conflicting_decision",
            ClusterError::UnroutableMessage(_) => "unroutable_message",
            ClusterError::NoDuties(_) => "no_duties",
            ClusterError::RateLimited { .. } => "rate_limited",
            ClusterError::BeaconNode(_) => "beacon_node",
            ClusterError::Signer(_) => "signer",
            ClusterError::Network(_) => "network",
            ClusterError::Engine(_) => "engine",
            ClusterError::Codec(_) => "codec",
        }
    }
}

impl From<bincode::Error> for ClusterError {
    fn from(err: bincode::Error) -> Self {
        ClusterError::Codec(err.to_string())
    }
}

/// Result type for cluster consensus operations
pub type ClusterResult<T> = Result<T, ClusterError>;
