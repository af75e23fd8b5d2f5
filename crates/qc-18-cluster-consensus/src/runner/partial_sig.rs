//! Partial Signature Runner
//!
//! One runner per (validator, aggregated role) of a cluster. It turns the
//! cluster's decided value into this operator's partial signature, collects
//! peer signatures over the same signing root and reconstructs the validator
//! signature once a quorum is reached.
//!
//! Work is kept per slot: a superseded slot can still decide after a newer
//! duty was prepared, and its signing must not be lost. Slots older than the
//! retention window are pruned when a newer duty arrives.
//!
//! Peer signatures are verified before the collection lock is taken; only
//! the quorum bookkeeping is serialized. The signer is never called with the
//! lock held.

use crate::domain::{
    BlsSignature, ClusterError, ClusterResult, CollectOutcome, CollectedSignature, ConsensusData,
    Domain, Duty, MessageId, OperatorId, PartialSigState, Recipient, Role, RoleHandling,
    RunnerKey, SignatureCollector, SigningPayload, Slot, ValidatorShare, SLOTS_PER_EPOCH,
};
use crate::events::{
    FinalizedSignature, NetworkMessage, PartialSignatureMessage, PostConsensusOutcome,
    UponDecidedOutcome,
};
use crate::ports::{Network, ShareSigner, SignatureVerifier};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Slots of work kept when no retention is configured.
const DEFAULT_RETAINED_SLOTS: Slot = 2 * SLOTS_PER_EPOCH;

/// Duty and collection state for one slot.
struct SlotWork {
    duty: Duty,
    collector: SignatureCollector,
}

/// Post-consensus signing for one validator and role
pub struct PartialSigRunner {
    key: RunnerKey,
    operator: OperatorId,
    domain: Domain,
    message_id: MessageId,
    share: ValidatorShare,
    slots: Mutex<BTreeMap<Slot, SlotWork>>,
    retained_slots: Slot,
    signer: Arc<dyn ShareSigner>,
    verifier: Arc<dyn SignatureVerifier>,
    network: Arc<dyn Network>,
}

impl PartialSigRunner {
    pub fn new(
        role: Role,
        share: ValidatorShare,
        operator: OperatorId,
        domain: Domain,
        signer: Arc<dyn ShareSigner>,
        verifier: Arc<dyn SignatureVerifier>,
        network: Arc<dyn Network>,
    ) -> ClusterResult<Self> {
        if role.handling() != Some(RoleHandling::Aggregated) {
            return Err(ClusterError::InvalidInput(format!(
                "role {} has no partial signature runner",
                role
            )));
        }
        if share.share_pubkey(operator).is_none() {
            return Err(ClusterError::InvalidInput(format!(
                "operator {} is not in the committee of validator {}",
                operator, share.validator_pubkey
            )));
        }

        let validator = share.validator_pubkey;
        Ok(Self {
            key: RunnerKey::new(validator, role),
            operator,
            domain,
            message_id: MessageId::new(domain, role, Recipient::Validator(validator))?,
            share,
            slots: Mutex::new(BTreeMap::new()),
            retained_slots: DEFAULT_RETAINED_SLOTS,
            signer,
            verifier,
            network,
        })
    }

    /// Keep work for slots within `slots` of the newest prepared slot.
    pub fn with_retained_slots(mut self, slots: Slot) -> Self {
        self.retained_slots = slots.max(1);
        self
    }

    pub fn key(&self) -> RunnerKey {
        self.key
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn quorum(&self) -> usize {
        self.share.quorum()
    }

    /// State of the newest prepared slot.
    pub fn state(&self) -> PartialSigState {
        self.slots
            .lock()
            .values()
            .next_back()
            .map_or(PartialSigState::Waiting, |work| work.collector.state())
    }

    pub fn state_at(&self, slot: Slot) -> Option<PartialSigState> {
        self.slots.lock().get(&slot).map(|work| work.collector.state())
    }

    /// Newest prepared slot.
    pub fn current_slot(&self) -> Option<Slot> {
        self.slots.lock().keys().next_back().copied()
    }

    pub fn prepared_slots(&self) -> Vec<Slot> {
        self.slots.lock().keys().copied().collect()
    }

    /// Signatures collected for the newest prepared slot.
    pub fn signature_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .next_back()
            .map_or(0, |work| work.collector.signature_count())
    }

    /// Reconstructed signature of the newest prepared slot.
    pub fn aggregate(&self) -> Option<BlsSignature> {
        self.slots
            .lock()
            .values()
            .next_back()
            .and_then(|work| work.collector.aggregate())
    }

    pub fn aggregate_at(&self, slot: Slot) -> Option<BlsSignature> {
        self.slots
            .lock()
            .get(&slot)
            .and_then(|work| work.collector.aggregate())
    }

    /// Install the local duty for its slot.
    ///
    /// A prepared slot only refreshes its duty. A slot older than the newest
    /// prepared one is stale.
    pub fn prepare(&self, duty: Duty) -> ClusterResult<()> {
        if duty.validator_pubkey != self.key.validator || duty.role != self.key.role {
            return Err(ClusterError::InvalidInput(format!(
                "duty {} for {} given to runner {} for {}",
                duty.role, duty.validator_pubkey, self.key.role, self.key.validator
            )));
        }

        let mut slots = self.slots.lock();
        if let Some(work) = slots.get_mut(&duty.slot) {
            work.duty = duty;
            return Ok(());
        }
        if let Some(&highest) = slots.keys().next_back() {
            if duty.slot < highest {
                return Err(ClusterError::StaleSlot {
                    slot: duty.slot,
                    highest,
                });
            }
        }

        let slot = duty.slot;
        let collector = SignatureCollector::new(slot, self.share.quorum());
        slots.insert(slot, SlotWork { duty, collector });

        let horizon = slot.saturating_sub(self.retained_slots);
        let retained = slots.split_off(&horizon);
        *slots = retained;
        Ok(())
    }

    /// Drop the work of a slot that can no longer decide.
    pub fn retire(&self, slot: Slot) -> bool {
        self.slots.lock().remove(&slot).is_some()
    }

    /// Sign the validator-specific payload derived from the decided value.
    ///
    /// A repeat with the same value is a no-op. If signing fails the claim is
    /// released so a later call can retry.
    pub async fn upon_decided(&self, data: &ConsensusData) -> ClusterResult<UponDecidedOutcome> {
        let slot = data.slot;
        let signing_root = {
            let mut slots = self.slots.lock();
            let work = Self::work_for(&mut slots, slot)?;
            let payload = SigningPayload::derive(self.key.role, data, &work.duty)?;
            let signing_root = payload.signing_root(self.domain);
            if !work.collector.claim(signing_root)? {
                return Ok(UponDecidedOutcome::Unchanged);
            }
            signing_root
        };

        let signature = match self.signer.sign(&self.key.validator, &signing_root).await {
            Ok(signature) => signature,
            Err(e) => {
                if let Ok(work) = Self::work_for(&mut self.slots.lock(), slot) {
                    work.collector.release_claim();
                }
                return Err(ClusterError::Signer(e));
            }
        };

        let finalized = {
            let mut slots = self.slots.lock();
            let work = Self::work_for(&mut slots, slot)?;
            let outcome = work.collector.record_own(self.operator, signature);
            // Our own signature may already have been echoed back by a peer
            if outcome == CollectOutcome::QuorumReached || work.collector.try_enter_quorum() {
                Some(self.finalize(work))
            } else {
                None
            }
        };

        debug!(
            "[qc-18] Signed {} duty of {} for slot {}",
            self.key.role, self.key.validator, slot
        );
        self.broadcast(PartialSignatureMessage {
            slot,
            signer: self.operator,
            signing_root,
            partial_signature: signature,
        })
        .await;

        match finalized {
            Some(result) => Ok(UponDecidedOutcome::Finalized(result?)),
            None => Ok(UponDecidedOutcome::Signed),
        }
    }

    /// Accept one peer partial signature.
    pub fn process_post_consensus(
        &self,
        msg: &PartialSignatureMessage,
    ) -> ClusterResult<PostConsensusOutcome> {
        let share_pubkey =
            self.share
                .share_pubkey(msg.signer)
                .ok_or(ClusterError::UnknownSigner {
                    signer: msg.signer,
                    recipient: Recipient::Validator(self.key.validator),
                })?;
        if msg.signer == self.operator {
            return Ok(PostConsensusOutcome::Duplicate);
        }
        if !self
            .verifier
            .verify_partial(share_pubkey, &msg.signing_root, &msg.partial_signature)
        {
            return Err(ClusterError::InvalidPartialSignature {
                signer: msg.signer,
                reason: "signature does not verify against share key".into(),
            });
        }

        let mut slots = self.slots.lock();
        let work = Self::work_for(&mut slots, msg.slot)?;
        if work.collector.state() == PartialSigState::Finalized {
            return Ok(PostConsensusOutcome::AlreadyFinalized);
        }

        let collected = CollectedSignature {
            signing_root: msg.signing_root,
            signature: msg.partial_signature,
        };
        match work.collector.record_peer(msg.signer, collected)? {
            CollectOutcome::Duplicate => Ok(PostConsensusOutcome::Duplicate),
            CollectOutcome::Added => {
                crate::metrics::record_partial_signature();
                Ok(PostConsensusOutcome::Pending {
                    collected: work.collector.signature_count(),
                    quorum: self.share.quorum(),
                })
            }
            CollectOutcome::QuorumReached => {
                crate::metrics::record_partial_signature();
                Ok(PostConsensusOutcome::Finalized(self.finalize(work)?))
            }
        }
    }

    fn work_for(
        slots: &mut BTreeMap<Slot, SlotWork>,
        slot: Slot,
    ) -> ClusterResult<&mut SlotWork> {
        let highest = slots.keys().next_back().copied();
        match slots.get_mut(&slot) {
            Some(work) => Ok(work),
            None => match highest {
                Some(highest) if highest > slot => Err(ClusterError::StaleSlot { slot, highest }),
                _ => Err(ClusterError::NoActiveDuty(slot)),
            },
        }
    }

    /// Reconstruct the validator signature. Called with the lock held.
    ///
    /// On failure the slot leaves `Quorum`, so the next accepted share
    /// retries the reconstruction.
    fn finalize(&self, work: &mut SlotWork) -> ClusterResult<FinalizedSignature> {
        let slot = work.collector.slot();
        let signing_root = work
            .collector
            .decided_root()
            .ok_or(ClusterError::NoActiveDuty(slot))?;
        let shares = work.collector.quorum_shares();
        let signature = match self
            .verifier
            .reconstruct(&self.key.validator, &signing_root, &shares)
        {
            Ok(signature) => signature,
            Err(e) => {
                work.collector.reopen_quorum();
                warn!(
                    "[qc-18] Reconstruction of {} for slot {} failed with {} shares: {}",
                    self.key.validator,
                    slot,
                    shares.len(),
                    e
                );
                return Err(ClusterError::Signer(e));
            }
        };
        work.collector.finalize(signature);

        crate::metrics::record_duty_finalized();
        info!(
            "[qc-18] Reconstructed {} signature of {} for slot {} from {} shares",
            self.key.role,
            self.key.validator,
            slot,
            shares.len()
        );
        Ok(FinalizedSignature {
            validator: self.key.validator,
            role: self.key.role,
            slot,
            signing_root,
            signature,
        })
    }

    async fn broadcast(&self, msg: PartialSignatureMessage) {
        let envelope = match NetworkMessage::partial_signature(self.message_id, &msg) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[qc-18] Failed to encode partial signature: {}", e);
                return;
            }
        };
        if let Err(e) = self.network.broadcast(envelope).await {
            warn!(
                "[qc-18] Partial signature broadcast failed for {} slot {}: {}",
                self.key.validator, msg.slot, e
            );
        }
    }
}
