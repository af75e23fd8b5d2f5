//! Outcomes reported to the scheduler and transport

use crate::domain::{
    BlsSignature, ClusterError, ClusterId, ConsensusData, Duty, Role, Root, RunnerKey, Slot,
    ValidatorPubkey,
};
use serde::{Deserialize, Serialize};

/// A cluster's decided value for a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub cluster_id: ClusterId,
    pub slot: Slot,
    pub value: ConsensusData,
    /// Lower superseded slots that can no longer decide
    #[serde(default)]
    pub abandoned: Vec<Slot>,
}

/// Result of fanning a decision out to the partial-signature runners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionReport {
    pub decision: Decision,
    /// Runners that emitted their partial signature
    pub signed: Vec<RunnerKey>,
    /// Runners for which the call was an idempotent no-op
    pub unchanged: Vec<RunnerKey>,
    /// Runners that reached quorum with the local signature
    pub finalized: Vec<FinalizedSignature>,
    /// Runners that failed; other runners are unaffected
    pub failed: Vec<(RunnerKey, ClusterError)>,
}

impl DecisionReport {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            signed: Vec::new(),
            unchanged: Vec::new(),
            finalized: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Reconstructed validator signature for one duty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedSignature {
    pub validator: ValidatorPubkey,
    pub role: Role,
    pub slot: Slot,
    pub signing_root: Root,
    pub signature: BlsSignature,
}

/// Result of processing one peer partial signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostConsensusOutcome {
    /// Accepted; quorum not reached yet
    Pending { collected: usize, quorum: usize },
    /// Signer already counted for this slot
    Duplicate,
    Finalized(FinalizedSignature),
    /// Slot already finalized; message ignored
    AlreadyFinalized,
}

/// Result of an `UponDecided` call on one runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UponDecidedOutcome {
    Signed,
    /// Same value already handled for this slot
    Unchanged,
    /// Local signature completed the quorum
    Finalized(FinalizedSignature),
}

/// How the consensus instance was handled by a duty start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusStart {
    Started,
    /// An instance for the slot was already running
    Reused,
}

/// Result of `Cluster::start_duties`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DutyStartOutcome {
    pub cluster_id: ClusterId,
    pub slot: Slot,
    /// `None` when the start only carried legacy duties
    pub consensus: Option<ConsensusStart>,
    /// Duties left to the single-validator machinery
    pub legacy: Vec<Duty>,
    /// Set when the engine decided immediately
    pub decision: Option<DecisionReport>,
}

/// Result of routing one inbound `NetworkMessage`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// Consensus message processed, with the fan-out report if it decided
    Consensus(Option<DecisionReport>),
    PartialSignature(PostConsensusOutcome),
    /// Discarded before reaching any runner
    Dropped(ClusterError),
}
