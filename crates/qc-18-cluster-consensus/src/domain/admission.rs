//! Duty admission policy
//!
//! Attestation duty starts are limited per cluster per epoch by the size of
//! the cluster, not by validator identity:
//!
//! - at most `slots_per_epoch` attestation duty starts per epoch;
//! - no limit once the cluster governs `>= slots_per_epoch` validators;
//! - no limit in an epoch where the cluster also holds a sync committee duty.

use super::{ClusterError, ClusterId, ClusterResult, Epoch};
use std::collections::BTreeMap;

/// Epochs of admission history kept per cluster.
const RETAINED_EPOCHS: u64 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct EpochUsage {
    attestation_starts: u64,
    has_sync_committee: bool,
}

/// Attestation duty limit for one epoch, `None` meaning unlimited.
pub fn attestation_limit(
    slots_per_epoch: u64,
    validator_count: usize,
    has_sync_committee: bool,
) -> Option<u64> {
    if has_sync_committee || validator_count as u64 >= slots_per_epoch {
        None
    } else {
        Some(slots_per_epoch)
    }
}

/// Per-cluster duty start accounting.
#[derive(Debug)]
pub struct DutyAdmission {
    cluster_id: ClusterId,
    slots_per_epoch: u64,
    usage: BTreeMap<Epoch, EpochUsage>,
}

impl DutyAdmission {
    pub fn new(cluster_id: ClusterId, slots_per_epoch: u64) -> Self {
        Self {
            cluster_id,
            slots_per_epoch: slots_per_epoch.max(1),
            usage: BTreeMap::new(),
        }
    }

    pub fn epoch_of(&self, slot: u64) -> Epoch {
        slot / self.slots_per_epoch
    }

    /// Admit a duty start for `epoch`.
    ///
    /// Sync committee duties in the same start are recorded before the
    /// attestation limit is evaluated. A rejected start leaves the counters
    /// unchanged.
    pub fn admit(
        &mut self,
        epoch: Epoch,
        has_attestation: bool,
        has_sync_committee: bool,
        validator_count: usize,
    ) -> ClusterResult<()> {
        let usage = self.usage.entry(epoch).or_default();
        if has_sync_committee {
            usage.has_sync_committee = true;
        }

        if has_attestation {
            let limit =
                attestation_limit(self.slots_per_epoch, validator_count, usage.has_sync_committee);
            if let Some(limit) = limit {
                if usage.attestation_starts >= limit {
                    return Err(ClusterError::RateLimited {
                        cluster: self.cluster_id,
                        epoch,
                        limit,
                    });
                }
            }
            usage.attestation_starts += 1;
        }

        self.prune(epoch);
        Ok(())
    }

    /// Attestation starts recorded for `epoch`.
    pub fn attestation_starts(&self, epoch: Epoch) -> u64 {
        self.usage
            .get(&epoch)
            .map(|u| u.attestation_starts)
            .unwrap_or(0)
    }

    fn prune(&mut self, current: Epoch) {
        let keep_from = current.saturating_sub(RETAINED_EPOCHS - 1);
        self.usage = self.usage.split_off(&keep_from);
    }
}
