//! Consensus Runner
//!
//! Owns the single agreement instance of a cluster. Only one slot runs at a
//! time; starting a newer slot supersedes (does not abort) a lower one, whose
//! late decision is still applied while it is above the highest decided slot.
//!
//! # Locking
//! The instance lock serializes engine processing. Beacon node queries and
//! broadcasts happen outside of it.

use crate::domain::{
    ClusterConfig, ClusterError, ClusterId, ClusterResult, ConsensusData, InstanceState,
    InstanceTracker, MessageId, OperatorId, Recipient, Role, Root, Slot,
};
use crate::events::{ConsensusMessage, Decision, NetworkMessage};
use crate::ports::{AgreementEngine, BeaconNode, EngineOutput, InstanceId, Network, ValueCheck};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-cluster consensus runner
pub struct ConsensusRunner {
    cluster_id: ClusterId,
    message_id: MessageId,
    /// Committee every engine instance of this cluster runs with
    operators: Vec<OperatorId>,
    tracker: Mutex<InstanceTracker>,
    value_check: ValueCheck,
    beacon: Arc<dyn BeaconNode>,
    network: Arc<dyn Network>,
    engine: Arc<dyn AgreementEngine>,
}

impl ConsensusRunner {
    pub fn new(
        cluster_id: ClusterId,
        operators: Vec<OperatorId>,
        config: &ClusterConfig,
        value_check: ValueCheck,
        beacon: Arc<dyn BeaconNode>,
        network: Arc<dyn Network>,
        engine: Arc<dyn AgreementEngine>,
    ) -> Self {
        Self {
            cluster_id,
            message_id: MessageId::for_cluster(config.domain, cluster_id),
            operators,
            tracker: Mutex::new(InstanceTracker::new(config.decided_history_slots)),
            value_check,
            beacon,
            network,
            engine,
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Start the instance for `slot` on duty-agnostic data for `roles`.
    ///
    /// Returns a decision only if the engine decided on start (single
    /// operator clusters).
    pub async fn start_new_consensus(
        &self,
        roles: &BTreeSet<Role>,
        slot: Slot,
    ) -> ClusterResult<Option<Decision>> {
        if roles.is_empty() {
            return Err(ClusterError::NoDuties(slot));
        }
        self.tracker.lock().check_start(slot)?;

        let value = self.fetch_consensus_data(roles, slot).await?;
        (self.value_check)(&value).map_err(ClusterError::ValueRejected)?;

        let instance = self.instance(slot);
        let (decision, outbound) = {
            let mut tracker = self.tracker.lock();
            // Another start may have won the race while fetching
            let begin = tracker.begin(slot)?;
            if let Some(previous) = begin.superseded {
                debug!(
                    "[qc-18] Cluster {} superseding slot {} with slot {}",
                    self.cluster_id, previous, slot
                );
            }
            for evicted in begin.evicted {
                debug!(
                    "[qc-18] Cluster {} evicting undecided slot {}",
                    self.cluster_id, evicted
                );
                self.engine.drop_instance(&self.instance(evicted));
            }

            let output = match self.engine.start_instance(
                &instance,
                &self.operators,
                value,
                self.value_check.clone(),
            ) {
                Ok(output) => output,
                Err(e) => {
                    tracker.abandon(slot);
                    return Err(ClusterError::Engine(e));
                }
            };
            self.absorb(&mut tracker, slot, output)?
        };

        info!(
            "[qc-18] Cluster {} started consensus for slot {} ({} roles)",
            self.cluster_id,
            slot,
            roles.len()
        );
        self.broadcast(slot, outbound).await;
        Ok(decision)
    }

    /// Feed a protocol message into the instance it belongs to.
    ///
    /// At most one decision is ever returned per slot: later messages for
    /// a decided slot fail with `AlreadyDecided`.
    pub async fn process_consensus(&self, msg: &ConsensusMessage) -> ClusterResult<Option<Decision>> {
        if !self.operators.contains(&msg.signer) {
            return Err(ClusterError::UnknownSigner {
                signer: msg.signer,
                recipient: Recipient::Cluster(self.cluster_id),
            });
        }
        let (decision, outbound) = {
            let mut tracker = self.tracker.lock();
            tracker.match_slot(msg.slot)?;
            let output = self
                .engine
                .process_message(&self.instance(msg.slot), msg)
                .map_err(ClusterError::Engine)?;
            self.absorb(&mut tracker, msg.slot, output)?
        };

        self.broadcast(msg.slot, outbound).await;
        Ok(decision)
    }

    pub fn has_running_instance(&self) -> bool {
        self.tracker.lock().state().running_slot().is_some()
    }

    pub fn running_slot(&self) -> Option<Slot> {
        self.tracker.lock().state().running_slot()
    }

    pub fn highest_decided_slot(&self) -> Option<Slot> {
        self.tracker.lock().highest_decided()
    }

    pub fn decided_root(&self, slot: Slot) -> Option<Root> {
        self.tracker.lock().decided_root(slot)
    }

    pub fn state(&self) -> InstanceState {
        self.tracker.lock().state().clone()
    }

    /// Return to `Idle` once a decision has been fanned out.
    pub fn reset(&self) {
        self.tracker.lock().reset();
    }

    /// Release every engine instance still held by this runner.
    pub fn shutdown(&self) {
        let tracker = self.tracker.lock();
        let mut slots: Vec<Slot> = tracker.superseded_slots().collect();
        slots.extend(tracker.state().running_slot());
        for slot in slots {
            self.engine.drop_instance(&self.instance(slot));
        }
    }

    fn instance(&self, slot: Slot) -> InstanceId {
        InstanceId {
            cluster_id: self.cluster_id,
            slot,
        }
    }

    async fn fetch_consensus_data(
        &self,
        roles: &BTreeSet<Role>,
        slot: Slot,
    ) -> ClusterResult<ConsensusData> {
        let mut data = ConsensusData::new(slot);
        for role in roles {
            match role {
                Role::Attester => {
                    let mut attestation = self
                        .beacon
                        .attestation_data(slot)
                        .await
                        .map_err(ClusterError::BeaconNode)?;
                    // Committee index is validator-specific
                    attestation.index = 0;
                    data.attestation = Some(attestation);
                }
                Role::SyncCommittee => {
                    let root = self
                        .beacon
                        .sync_committee_block_root(slot)
                        .await
                        .map_err(ClusterError::BeaconNode)?;
                    data.sync_committee_block_root = Some(root);
                }
                other => {
                    return Err(ClusterError::InvalidInput(format!(
                        "role {} has no cluster consensus data",
                        other
                    )))
                }
            }
        }
        Ok(data)
    }

    /// Apply an engine output while the instance lock is held.
    fn absorb(
        &self,
        tracker: &mut InstanceTracker,
        slot: Slot,
        output: EngineOutput,
    ) -> ClusterResult<(Option<Decision>, Vec<ConsensusMessage>)> {
        let EngineOutput { outbound, decided } = output;
        let Some(value) = decided else {
            return Ok((None, outbound));
        };

        if value.slot != slot {
            return Err(ClusterError::Engine(format!(
                "engine decided slot {} for instance of slot {}",
                value.slot, slot
            )));
        }

        let dead = tracker.decide(slot, &value)?;
        self.engine.drop_instance(&self.instance(slot));
        for dead_slot in &dead {
            debug!(
                "[qc-18] Cluster {} dropping superseded slot {}",
                self.cluster_id, dead_slot
            );
            self.engine.drop_instance(&self.instance(*dead_slot));
        }

        crate::metrics::record_decision();
        info!("[qc-18] Cluster {} decided slot {}", self.cluster_id, slot);

        let decision = Decision {
            cluster_id: self.cluster_id,
            slot,
            value,
            abandoned: dead,
        };
        Ok((Some(decision), outbound))
    }

    async fn broadcast(&self, slot: Slot, outbound: Vec<ConsensusMessage>) {
        for msg in outbound {
            let envelope = match NetworkMessage::consensus(self.message_id, &msg) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("[qc-18] Failed to encode consensus message: {}", e);
                    continue;
                }
            };
            // Agreement tolerates lost messages; a failed broadcast is not fatal
            if let Err(e) = self.network.broadcast(envelope).await {
                warn!(
                    "[qc-18] Cluster {} broadcast failed for slot {}: {}",
                    self.cluster_id, slot, e
                );
            }
        }
    }
}
