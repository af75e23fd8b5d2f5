//! Driven ports (Outbound dependencies)
//!
//! Port methods return `Result<_, String>`; the runners map failures into
//! typed `ClusterError` variants at the boundary.

use crate::domain::{
    AttestationData, BlsSignature, ClusterId, ConsensusData, OperatorId, Root, SharePubkey, Slot,
    ValidatorPubkey,
};
use crate::events::{ConsensusMessage, NetworkMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Beacon node queries for duty-agnostic data
///
/// # Blocking
/// Calls may block on I/O; callers never hold a runner lock across them.
#[async_trait]
pub trait BeaconNode: Send + Sync {
    /// Attestation data for `slot` with the committee index left at zero
    async fn attestation_data(&self, slot: Slot) -> Result<AttestationData, String>;

    /// Head block root signed by sync committee members at `slot`
    async fn sync_committee_block_root(&self, slot: Slot) -> Result<Root, String>;
}

/// Produces this operator's partial signatures
#[async_trait]
pub trait ShareSigner: Send + Sync {
    /// Sign `signing_root` with this operator's share of `validator`'s key
    async fn sign(
        &self,
        validator: &ValidatorPubkey,
        signing_root: &Root,
    ) -> Result<BlsSignature, String>;
}

/// Partial signature verification and threshold reconstruction
pub trait SignatureVerifier: Send + Sync {
    /// Verify one operator's partial signature against its share key
    fn verify_partial(
        &self,
        share_pubkey: &SharePubkey,
        signing_root: &Root,
        signature: &BlsSignature,
    ) -> bool;

    /// Reconstruct the validator signature from a quorum of partial signatures
    fn reconstruct(
        &self,
        validator: &ValidatorPubkey,
        signing_root: &Root,
        shares: &[(OperatorId, BlsSignature)],
    ) -> Result<BlsSignature, String>;
}

/// Peer-to-peer broadcast
#[async_trait]
pub trait Network: Send + Sync {
    async fn broadcast(&self, msg: NetworkMessage) -> Result<(), String>;
}

/// Local veto applied to a value before it enters agreement.
pub type ValueCheck = Arc<dyn Fn(&ConsensusData) -> Result<(), String> + Send + Sync>;

/// Value check that only enforces the duty-agnostic payload rules.
pub fn duty_agnostic_check() -> ValueCheck {
    Arc::new(|data: &ConsensusData| {
        data.validate_duty_agnostic().map_err(|e| e.to_string())
    })
}

/// Agreement instance key: one per cluster per slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub cluster_id: ClusterId,
    pub slot: Slot,
}

/// What the engine wants done after a call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// Messages to broadcast to the cluster
    pub outbound: Vec<ConsensusMessage>,
    /// Set once the instance decided
    pub decided: Option<ConsensusData>,
}

/// Black-box BFT agreement engine
///
/// Compute-only: implementations must not block on I/O, as calls are made
/// while the runner serializes processing for the instance.
pub trait AgreementEngine: Send + Sync {
    /// Start an instance proposing `value`; `check` vetoes peer proposals.
    ///
    /// `committee` is the cluster's operator set. Only its members take part
    /// and the quorum is derived from its size.
    fn start_instance(
        &self,
        instance: &InstanceId,
        committee: &[OperatorId],
        value: ConsensusData,
        check: ValueCheck,
    ) -> Result<EngineOutput, String>;

    /// Feed one protocol message into a started instance
    fn process_message(
        &self,
        instance: &InstanceId,
        msg: &ConsensusMessage,
    ) -> Result<EngineOutput, String>;

    /// Release an instance that decided or can no longer decide
    fn drop_instance(&self, instance: &InstanceId);
}
