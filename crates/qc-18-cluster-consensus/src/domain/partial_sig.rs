//! Partial signature domain: signing payloads and per-slot collection
//!
//! ```text
//! Waiting ──own sig──→ SignedLocally ──quorum──→ Quorum ──reconstruct──→ Finalized
//! ```
//!
//! The collector is reset whenever a newer slot is seen.

use super::{
    AttestationData, ClusterError, ClusterResult, ConsensusData, Domain, Duty, OperatorId, Role,
    Root, Slot,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// BLS signature bytes (partial or reconstructed).
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlsSignature(#[serde_as(as = "Bytes")] pub [u8; 96]);

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature(0x{}…)", hex::encode(&self.0[..8]))
    }
}

/// Validator-specific payload derived from the shared decided value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigningPayload {
    Attestation(AttestationData),
    SyncCommitteeBlockRoot { slot: Slot, root: Root },
}

impl SigningPayload {
    /// Derive the payload one validator signs for `role`.
    pub fn derive(role: Role, data: &ConsensusData, duty: &Duty) -> ClusterResult<Self> {
        match role {
            Role::Attester => {
                let attestation = data.attestation.ok_or_else(|| {
                    ClusterError::InvalidInput(format!(
                        "decided value for slot {} has no attestation data",
                        data.slot
                    ))
                })?;
                Ok(SigningPayload::Attestation(
                    attestation.with_committee_index(duty.committee_index),
                ))
            }
            Role::SyncCommittee => {
                let root = data.sync_committee_block_root.ok_or_else(|| {
                    ClusterError::InvalidInput(format!(
                        "decided value for slot {} has no sync committee root",
                        data.slot
                    ))
                })?;
                Ok(SigningPayload::SyncCommitteeBlockRoot {
                    slot: data.slot,
                    root,
                })
            }
            other => Err(ClusterError::InvalidInput(format!(
                "role {} is not aggregated",
                other
            ))),
        }
    }

    pub fn slot(&self) -> Slot {
        match self {
            SigningPayload::Attestation(data) => data.slot,
            SigningPayload::SyncCommitteeBlockRoot { slot, .. } => *slot,
        }
    }

    /// Root every committee member signs with its share key.
    pub fn signing_root(&self, domain: Domain) -> Root {
        let mut hasher = Sha256::new();
        hasher.update(domain.0);
        match self {
            SigningPayload::Attestation(data) => {
                hasher.update(Role::Attester.code().to_le_bytes());
                data.hash_into(&mut hasher);
            }
            SigningPayload::SyncCommitteeBlockRoot { slot, root } => {
                hasher.update(Role::SyncCommittee.code().to_le_bytes());
                hasher.update(slot.to_le_bytes());
                hasher.update(root);
            }
        }
        hasher.finalize().into()
    }
}

/// Progress of one validator's signing for the current slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartialSigState {
    Waiting,
    SignedLocally,
    Quorum,
    Finalized,
}

/// A verified partial signature held by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectedSignature {
    pub signing_root: Root,
    pub signature: BlsSignature,
}

/// Outcome of adding a signature to the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectOutcome {
    Added,
    Duplicate,
    QuorumReached,
}

/// Per-slot partial signature bookkeeping for one (validator, role).
#[derive(Debug)]
pub struct SignatureCollector {
    slot: Slot,
    state: PartialSigState,
    quorum: usize,
    /// Root of the locally decided payload, once known
    decided_root: Option<Root>,
    /// Set once this operator has claimed the slot for signing
    own_claimed: bool,
    signatures: HashMap<OperatorId, CollectedSignature>,
    aggregate: Option<BlsSignature>,
}

impl SignatureCollector {
    pub fn new(slot: Slot, quorum: usize) -> Self {
        Self {
            slot,
            state: PartialSigState::Waiting,
            quorum,
            decided_root: None,
            own_claimed: false,
            signatures: HashMap::new(),
            aggregate: None,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn state(&self) -> PartialSigState {
        self.state
    }

    pub fn decided_root(&self) -> Option<Root> {
        self.decided_root
    }

    pub fn aggregate(&self) -> Option<BlsSignature> {
        self.aggregate
    }

    /// Claim the slot for local signing.
    ///
    /// Returns `false` when the same root was already claimed (idempotent
    /// repeat). A different root for the same slot is a conflicting decision.
    pub fn claim(&mut self, root: Root) -> ClusterResult<bool> {
        match self.decided_root {
            Some(existing) if existing != root => Err(ClusterError::ConflictingDecision(self.slot)),
            Some(_) if self.own_claimed => Ok(false),
            _ => {
                self.decided_root = Some(root);
                self.own_claimed = true;
                // Buffered signatures over another root can never count
                self.signatures.retain(|_, sig| sig.signing_root == root);
                Ok(true)
            }
        }
    }

    /// Undo a claim whose signing failed, so a retry may sign again.
    pub fn release_claim(&mut self) {
        if self.state == PartialSigState::Waiting {
            self.own_claimed = false;
        }
    }

    /// Record the local signature.
    pub fn record_own(&mut self, operator: OperatorId, signature: BlsSignature) -> CollectOutcome {
        let root = match self.decided_root {
            Some(root) => root,
            None => return CollectOutcome::Duplicate,
        };
        if self.state == PartialSigState::Waiting {
            self.state = PartialSigState::SignedLocally;
        }
        self.insert(operator, CollectedSignature { signing_root: root, signature })
    }

    /// Record a verified peer signature.
    pub fn record_peer(
        &mut self,
        operator: OperatorId,
        collected: CollectedSignature,
    ) -> ClusterResult<CollectOutcome> {
        if let Some(root) = self.decided_root {
            if collected.signing_root != root {
                return Err(ClusterError::InvalidPartialSignature {
                    signer: operator,
                    reason: "signing root does not match decided value".into(),
                });
            }
        }
        Ok(self.insert(operator, collected))
    }

    fn insert(&mut self, operator: OperatorId, collected: CollectedSignature) -> CollectOutcome {
        if self.signatures.contains_key(&operator) {
            return CollectOutcome::Duplicate;
        }
        self.signatures.insert(operator, collected);
        if self.has_quorum() && self.state == PartialSigState::SignedLocally {
            self.state = PartialSigState::Quorum;
            return CollectOutcome::QuorumReached;
        }
        CollectOutcome::Added
    }

    /// Whether the signatures over the decided root reach quorum.
    pub fn has_quorum(&self) -> bool {
        self.decided_root.is_some() && self.matching_count() >= self.quorum
    }

    /// Enter `Quorum` if buffered signatures already suffice.
    pub fn try_enter_quorum(&mut self) -> bool {
        if self.state == PartialSigState::SignedLocally && self.has_quorum() {
            self.state = PartialSigState::Quorum;
            return true;
        }
        false
    }

    pub fn matching_count(&self) -> usize {
        match self.decided_root {
            Some(root) => self
                .signatures
                .values()
                .filter(|sig| sig.signing_root == root)
                .count(),
            None => 0,
        }
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Signatures over the decided root, sorted by signer.
    pub fn quorum_shares(&self) -> Vec<(OperatorId, BlsSignature)> {
        let Some(root) = self.decided_root else {
            return Vec::new();
        };
        let mut shares: Vec<(OperatorId, BlsSignature)> = self
            .signatures
            .iter()
            .filter(|(_, sig)| sig.signing_root == root)
            .map(|(op, sig)| (*op, sig.signature))
            .collect();
        shares.sort_by_key(|(op, _)| *op);
        shares
    }

    pub fn finalize(&mut self, aggregate: BlsSignature) {
        self.aggregate = Some(aggregate);
        self.state = PartialSigState::Finalized;
    }

    /// Leave `Quorum` after a failed reconstruction.
    ///
    /// The next accepted share reports `QuorumReached` again, so
    /// reconstruction is retried with the larger share set.
    pub fn reopen_quorum(&mut self) {
        if self.state == PartialSigState::Quorum {
            self.state = PartialSigState::SignedLocally;
        }
    }
}
