//! Duties, role handling and validator shares
//!
//! Duties are the operator's local view of the beacon schedule. They are
//! treated as authoritative and are never agreed upon across operators.

use super::{
    ClusterError, ClusterResult, OperatorId, Role, SharePubkey, Slot, ValidatorPubkey,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a duty role is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleHandling {
    /// One cluster-wide consensus instance, then per-validator partial signatures
    Aggregated,
    /// Per-validator consensus handled by the single-validator machinery
    Legacy,
}

impl Role {
    /// Handling strategy for a duty with this role.
    ///
    /// `None` for `Committee`, which is a routing role and never a duty.
    pub fn handling(self) -> Option<RoleHandling> {
        match self {
            Role::Committee => None,
            Role::Attester | Role::SyncCommittee => Some(RoleHandling::Aggregated),
            Role::Aggregator
            | Role::Proposer
            | Role::SyncCommitteeContribution
            | Role::ValidatorRegistration
            | Role::VoluntaryExit => Some(RoleHandling::Legacy),
        }
    }
}

/// A scheduled obligation for one validator at one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duty {
    pub role: Role,
    pub validator_pubkey: ValidatorPubkey,
    pub validator_index: u64,
    pub slot: Slot,
    pub committee_index: u64,
    pub committee_length: u64,
    pub committees_at_slot: u64,
    pub validator_committee_index: u64,
    pub sync_committee_indices: Vec<u64>,
}

impl Duty {
    /// Attestation duty with the minimal committee fields.
    pub fn attester(
        validator_pubkey: ValidatorPubkey,
        validator_index: u64,
        slot: Slot,
        committee_index: u64,
    ) -> Self {
        Self {
            role: Role::Attester,
            validator_pubkey,
            validator_index,
            slot,
            committee_index,
            committee_length: 0,
            committees_at_slot: 0,
            validator_committee_index: 0,
            sync_committee_indices: Vec::new(),
        }
    }

    /// Sync committee duty.
    pub fn sync_committee(
        validator_pubkey: ValidatorPubkey,
        validator_index: u64,
        slot: Slot,
        sync_committee_indices: Vec<u64>,
    ) -> Self {
        Self {
            role: Role::SyncCommittee,
            validator_pubkey,
            validator_index,
            slot,
            committee_index: 0,
            committee_length: 0,
            committees_at_slot: 0,
            validator_committee_index: 0,
            sync_committee_indices,
        }
    }

    pub fn handling(&self) -> ClusterResult<RoleHandling> {
        self.role.handling().ok_or_else(|| {
            ClusterError::InvalidInput(format!("{} is not a duty role", self.role))
        })
    }
}

/// Key of a partial-signature runner inside a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunnerKey {
    pub validator: ValidatorPubkey,
    pub role: Role,
}

impl RunnerKey {
    pub fn new(validator: ValidatorPubkey, role: Role) -> Self {
        Self { validator, role }
    }
}

/// One operator's membership in a validator committee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMember {
    pub operator_id: OperatorId,
    pub share_pubkey: SharePubkey,
}

/// A validator managed by a cluster, with the share key of every member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorShare {
    pub validator_pubkey: ValidatorPubkey,
    pub validator_index: u64,
    pub committee: Vec<ShareMember>,
}

impl ValidatorShare {
    pub fn share_pubkey(&self, operator: OperatorId) -> Option<&SharePubkey> {
        self.committee
            .iter()
            .find(|member| member.operator_id == operator)
            .map(|member| &member.share_pubkey)
    }

    pub fn operator_ids(&self) -> BTreeSet<OperatorId> {
        self.committee.iter().map(|m| m.operator_id).collect()
    }

    /// Tolerated faulty members: `n = 3f + 1`.
    pub fn fault_tolerance(&self) -> usize {
        fault_tolerance(self.committee.len())
    }

    /// Partial signatures needed to reconstruct the validator signature.
    pub fn quorum(&self) -> usize {
        quorum(self.committee.len())
    }
}

/// Faulty members tolerated by a committee of `size` members.
pub fn fault_tolerance(size: usize) -> usize {
    size.saturating_sub(1) / 3
}

/// Quorum (`2f + 1`) for a committee of `size` members.
pub fn quorum(size: usize) -> usize {
    2 * fault_tolerance(size) + 1
}
