//! Deterministic beacon node adapter
//!
//! Answers every query from the slot number alone, so independent operators
//! observe identical duty-agnostic data.

use crate::domain::{AttestationData, Checkpoint, Root, Slot, SLOTS_PER_EPOCH};
use crate::ports::BeaconNode;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Static beacon node for testing
pub struct StaticBeaconNode {
    failing: AtomicBool,
    queries: AtomicU64,
}

impl StaticBeaconNode {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            queries: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of queries answered or refused so far
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Head block root reported for `slot`
    pub fn block_root(slot: Slot) -> Root {
        let mut hasher = Sha256::new();
        hasher.update(b"block");
        hasher.update(slot.to_le_bytes());
        hasher.finalize().into()
    }

    fn checkpoint(epoch: u64) -> Checkpoint {
        Checkpoint {
            epoch,
            root: Self::block_root(epoch * SLOTS_PER_EPOCH),
        }
    }

    fn query(&self) -> Result<(), String> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err("beacon node unreachable".into());
        }
        Ok(())
    }
}

impl Default for StaticBeaconNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BeaconNode for StaticBeaconNode {
    async fn attestation_data(&self, slot: Slot) -> Result<AttestationData, String> {
        self.query()?;
        let epoch = slot / SLOTS_PER_EPOCH;
        Ok(AttestationData {
            slot,
            // Real nodes answer with the committee index of the request
            index: slot % 4 + 1,
            beacon_block_root: Self::block_root(slot),
            source: Self::checkpoint(epoch.saturating_sub(1)),
            target: Self::checkpoint(epoch),
        })
    }

    async fn sync_committee_block_root(&self, slot: Slot) -> Result<Root, String> {
        self.query()?;
        Ok(Self::block_root(slot))
    }
}
