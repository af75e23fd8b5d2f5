//! Cluster consensus configuration

use super::{Domain, HOLESKY_DOMAIN, MAINNET_DOMAIN};
use serde::{Deserialize, Serialize};

/// Slots per beacon chain epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Configuration shared by every cluster on a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Network domain stamped into every MessageId
    pub domain: Domain,
    /// Slots per epoch, also the per-epoch attestation duty limit
    pub slots_per_epoch: u64,
    /// Decided slots remembered for replay rejection
    pub decided_history_slots: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            domain: MAINNET_DOMAIN,
            slots_per_epoch: SLOTS_PER_EPOCH,
            decided_history_slots: 2 * SLOTS_PER_EPOCH as usize,
        }
    }
}

impl ClusterConfig {
    /// Create a config for testing (testnet domain, short history).
    pub fn for_testing() -> Self {
        Self {
            domain: HOLESKY_DOMAIN,
            slots_per_epoch: SLOTS_PER_EPOCH,
            decided_history_slots: 8,
        }
    }

    pub fn epoch_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch.max(1)
    }
}
