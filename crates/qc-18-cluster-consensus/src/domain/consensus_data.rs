//! Validator-independent consensus payload
//!
//! Everything in `ConsensusData` is shared by all validators of a cluster for
//! a slot. Validator-specific fields (the attestation committee index) stay
//! zeroed here and are filled in from the local duty at signing time.

use super::{ClusterError, ClusterResult, Epoch, Root, Slot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Casper FFG checkpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Root,
}

/// Beacon attestation data.
///
/// In agreed `ConsensusData` the `index` field is a placeholder and must be 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationData {
    pub slot: Slot,
    pub index: u64,
    pub beacon_block_root: Root,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

impl AttestationData {
    /// Copy of this data bound to a specific committee.
    pub fn with_committee_index(&self, index: u64) -> Self {
        Self { index, ..*self }
    }

    pub(crate) fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.slot.to_le_bytes());
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.beacon_block_root);
        hasher.update(self.source.epoch.to_le_bytes());
        hasher.update(self.source.root);
        hasher.update(self.target.epoch.to_le_bytes());
        hasher.update(self.target.root);
    }
}

/// The value a cluster agrees on once per slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsensusData {
    pub slot: Slot,
    /// Present when at least one validator has an attestation duty
    pub attestation: Option<AttestationData>,
    /// Present when at least one validator has a sync committee duty
    pub sync_committee_block_root: Option<Root>,
}

impl ConsensusData {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            attestation: None,
            sync_committee_block_root: None,
        }
    }

    /// Content hash, used to compare decided values.
    pub fn root(&self) -> Root {
        let mut hasher = Sha256::new();
        hasher.update(self.slot.to_le_bytes());
        match &self.attestation {
            Some(data) => {
                hasher.update([1u8]);
                data.hash_into(&mut hasher);
            }
            None => hasher.update([0u8]),
        }
        match &self.sync_committee_block_root {
            Some(root) => {
                hasher.update([1u8]);
                hasher.update(root);
            }
            None => hasher.update([0u8]),
        }
        hasher.finalize().into()
    }

    /// Check the payload does not carry validator-specific content.
    pub fn validate_duty_agnostic(&self) -> ClusterResult<()> {
        if self.attestation.is_none() && self.sync_committee_block_root.is_none() {
            return Err(ClusterError::InvalidInput(format!(
                "consensus data for slot {} carries no duty payload",
                self.slot
            )));
        }

        if let Some(attestation) = &self.attestation {
            if attestation.slot != self.slot {
                return Err(ClusterError::InvalidInput(format!(
                    "attestation slot {} differs from consensus slot {}",
                    attestation.slot, self.slot
                )));
            }
            if attestation.index != 0 {
                return Err(ClusterError::InvalidInput(format!(
                    "attestation committee index must be a zero placeholder, got {}",
                    attestation.index
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(slot: Slot) -> ConsensusData {
        ConsensusData {
            slot,
            attestation: Some(AttestationData {
                slot,
                index: 0,
                beacon_block_root: [1u8; 32],
                source: Checkpoint { epoch: 1, root: [2u8; 32] },
                target: Checkpoint { epoch: 2, root: [3u8; 32] },
            }),
            sync_committee_block_root: Some([1u8; 32]),
        }
    }

    #[test]
    fn test_root_is_stable_and_content_sensitive() {
        let a = sample(64);
        assert_eq!(a.root(), sample(64).root());
        assert_ne!(a.root(), sample(65).root());

        let mut without_sync = a.clone();
        without_sync.sync_committee_block_root = None;
        assert_ne!(a.root(), without_sync.root());
    }

    #[test]
    fn test_duty_agnostic_accepts_placeholder_index() {
        assert!(sample(10).validate_duty_agnostic().is_ok());
    }

    #[test]
    fn test_duty_agnostic_rejects_committee_index() {
        let mut data = sample(10);
        data.attestation = data.attestation.map(|a| a.with_committee_index(3));
        assert!(matches!(
            data.validate_duty_agnostic(),
            Err(ClusterError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duty_agnostic_rejects_empty_payload() {
        assert!(ConsensusData::new(5).validate_duty_agnostic().is_err());
    }
}
