//! Cluster - one operator set, its consensus instance and its signing runners
//!
//! A cluster runs a single agreement instance per slot for all of its
//! validators, then fans the decided value out to one `PartialSigRunner`
//! per (validator, role).

use crate::domain::{
    derive_cluster_id, ClusterConfig, ClusterError, ClusterId, ClusterResult, Duty, DutyAdmission,
    OperatorId, Role, RoleHandling, RunnerKey, Slot, ValidatorPubkey, ValidatorShare,
};
use crate::events::{
    ConsensusMessage, ConsensusStart, Decision, DecisionReport, DutyStartOutcome,
    PartialSignatureMessage, PostConsensusOutcome, UponDecidedOutcome,
};
use crate::ports::{AgreementEngine, BeaconNode, Network, ShareSigner, SignatureVerifier, ValueCheck};
use crate::runner::{ConsensusRunner, PartialSigRunner};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dependencies shared by the clusters of a node
#[derive(Clone)]
pub struct ClusterDependencies {
    pub beacon: Arc<dyn BeaconNode>,
    pub signer: Arc<dyn ShareSigner>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub network: Arc<dyn Network>,
    pub engine: Arc<dyn AgreementEngine>,
    pub value_check: ValueCheck,
}

/// A cluster of operators jointly managing a set of validators
pub struct Cluster {
    cluster_id: ClusterId,
    operators: BTreeSet<OperatorId>,
    operator: OperatorId,
    config: ClusterConfig,
    consensus: ConsensusRunner,
    shares: RwLock<HashMap<ValidatorPubkey, ValidatorShare>>,
    runners: RwLock<HashMap<RunnerKey, Arc<PartialSigRunner>>>,
    /// Runners holding a duty for each started, undecided slot
    slot_runners: Mutex<BTreeMap<Slot, BTreeSet<RunnerKey>>>,
    admission: Mutex<DutyAdmission>,
    deps: ClusterDependencies,
}

impl Cluster {
    /// Create the cluster of `operators` as seen by `operator`.
    pub fn new(
        operators: &[OperatorId],
        operator: OperatorId,
        config: ClusterConfig,
        deps: ClusterDependencies,
    ) -> ClusterResult<Self> {
        let cluster_id = derive_cluster_id(operators)?;
        let operators: BTreeSet<OperatorId> = operators.iter().copied().collect();
        if !operators.contains(&operator) {
            return Err(ClusterError::InvalidInput(format!(
                "operator {} is not a member of cluster {}",
                operator, cluster_id
            )));
        }

        let consensus = ConsensusRunner::new(
            cluster_id,
            operators.iter().copied().collect(),
            &config,
            deps.value_check.clone(),
            deps.beacon.clone(),
            deps.network.clone(),
            deps.engine.clone(),
        );

        Ok(Self {
            cluster_id,
            operators,
            operator,
            admission: Mutex::new(DutyAdmission::new(cluster_id, config.slots_per_epoch)),
            config,
            consensus,
            shares: RwLock::new(HashMap::new()),
            runners: RwLock::new(HashMap::new()),
            slot_runners: Mutex::new(BTreeMap::new()),
            deps,
        })
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn operators(&self) -> &BTreeSet<OperatorId> {
        &self.operators
    }

    pub fn consensus(&self) -> &ConsensusRunner {
        &self.consensus
    }

    pub fn has_running_instance(&self) -> bool {
        self.consensus.has_running_instance()
    }

    pub fn validator_count(&self) -> usize {
        self.shares.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.read().is_empty()
    }

    pub fn validators(&self) -> Vec<ValidatorPubkey> {
        self.shares.read().keys().copied().collect()
    }

    pub fn runner(&self, validator: &ValidatorPubkey, role: Role) -> Option<Arc<PartialSigRunner>> {
        self.runners
            .read()
            .get(&RunnerKey::new(*validator, role))
            .cloned()
    }

    pub fn runner_count(&self) -> usize {
        self.runners.read().len()
    }

    /// Add (or replace) a validator share. Its committee must be this cluster.
    pub fn add_validator(&self, share: ValidatorShare) -> ClusterResult<()> {
        if share.operator_ids() != self.operators {
            return Err(ClusterError::InvalidInput(format!(
                "committee of validator {} does not match cluster {}",
                share.validator_pubkey, self.cluster_id
            )));
        }

        let validator = share.validator_pubkey;
        let replaced = self.shares.write().insert(validator, share).is_some();
        if replaced {
            // Runners hold a copy of the share
            self.runners.write().retain(|key, _| key.validator != validator);
        }
        debug!(
            "[qc-18] Cluster {} now manages {} validators",
            self.cluster_id,
            self.validator_count()
        );
        Ok(())
    }

    /// Remove a validator and its runners.
    pub fn remove_validator(&self, validator: &ValidatorPubkey) -> Option<ValidatorShare> {
        let removed = self.shares.write().remove(validator)?;
        self.runners.write().retain(|key, _| key.validator != *validator);
        for keys in self.slot_runners.lock().values_mut() {
            keys.retain(|key| key.validator != *validator);
        }
        Some(removed)
    }

    /// Start the duties of this cluster for `slot`.
    pub async fn start_duties(&self, duties: Vec<Duty>, slot: Slot) -> ClusterResult<DutyStartOutcome> {
        let result = self.start(duties, slot).await;
        if let Err(e) = &result {
            crate::metrics::record_duty_start_rejected(e.label());
            warn!(
                "[qc-18] Cluster {} rejected duties for slot {}: {}",
                self.cluster_id, slot, e
            );
        }
        result
    }

    async fn start(&self, duties: Vec<Duty>, slot: Slot) -> ClusterResult<DutyStartOutcome> {
        if duties.is_empty() {
            return Err(ClusterError::NoDuties(slot));
        }

        let mut aggregated = Vec::new();
        let mut legacy = Vec::new();
        {
            let shares = self.shares.read();
            for duty in duties {
                if duty.slot != slot {
                    return Err(ClusterError::InvalidInput(format!(
                        "duty for slot {} in start of slot {}",
                        duty.slot, slot
                    )));
                }
                if !shares.contains_key(&duty.validator_pubkey) {
                    return Err(ClusterError::InvalidInput(format!(
                        "validator {} is not managed by cluster {}",
                        duty.validator_pubkey, self.cluster_id
                    )));
                }
                match duty.handling()? {
                    RoleHandling::Aggregated => aggregated.push(duty),
                    RoleHandling::Legacy => legacy.push(duty),
                }
            }
        }

        let mut outcome = DutyStartOutcome {
            cluster_id: self.cluster_id,
            slot,
            consensus: None,
            legacy,
            decision: None,
        };
        if aggregated.is_empty() {
            return Ok(outcome);
        }

        let roles: BTreeSet<Role> = aggregated.iter().map(|duty| duty.role).collect();
        let reuse = self.consensus.running_slot() == Some(slot);
        if !reuse {
            let validator_count = self.validator_count();
            self.admission.lock().admit(
                self.config.epoch_of(slot),
                roles.contains(&Role::Attester),
                roles.contains(&Role::SyncCommittee),
                validator_count,
            )?;
        }

        self.prepare_runners(aggregated, slot)?;

        if reuse {
            outcome.consensus = Some(ConsensusStart::Reused);
            return Ok(outcome);
        }

        let decision = self.consensus.start_new_consensus(&roles, slot).await?;
        outcome.consensus = Some(ConsensusStart::Started);
        if let Some(decision) = decision {
            outcome.decision = Some(self.fan_out(decision).await);
        }
        Ok(outcome)
    }

    /// Create missing runners and hand each its duty for `slot`.
    fn prepare_runners(&self, duties: Vec<Duty>, slot: Slot) -> ClusterResult<()> {
        let mut keys = BTreeSet::new();
        for duty in duties {
            let key = RunnerKey::new(duty.validator_pubkey, duty.role);
            let runner = self.runner_or_create(key)?;
            runner.prepare(duty)?;
            keys.insert(key);
        }

        let mut slot_runners = self.slot_runners.lock();
        slot_runners.entry(slot).or_default().extend(keys);
        let horizon = slot.saturating_sub(self.config.decided_history_slots as Slot);
        slot_runners.retain(|s, _| *s >= horizon);
        Ok(())
    }

    fn runner_or_create(&self, key: RunnerKey) -> ClusterResult<Arc<PartialSigRunner>> {
        if let Some(runner) = self.runners.read().get(&key) {
            return Ok(runner.clone());
        }

        let share = self
            .shares
            .read()
            .get(&key.validator)
            .cloned()
            .ok_or_else(|| {
                ClusterError::InvalidInput(format!("validator {} has no share", key.validator))
            })?;
        let runner = Arc::new(PartialSigRunner::new(
            key.role,
            share,
            self.operator,
            self.config.domain,
            self.deps.signer.clone(),
            self.deps.verifier.clone(),
            self.deps.network.clone(),
        )?
        .with_retained_slots(self.config.decided_history_slots as Slot));

        Ok(self
            .runners
            .write()
            .entry(key)
            .or_insert(runner)
            .clone())
    }

    /// Process one agreement message; a decision is fanned out before returning.
    pub async fn process_consensus(
        &self,
        msg: &ConsensusMessage,
    ) -> ClusterResult<Option<DecisionReport>> {
        match self.consensus.process_consensus(msg).await? {
            Some(decision) => Ok(Some(self.fan_out(decision).await)),
            None => Ok(None),
        }
    }

    /// Route one partial signature to the runner of (validator, role).
    pub fn process_partial_signature(
        &self,
        validator: &ValidatorPubkey,
        role: Role,
        msg: &PartialSignatureMessage,
    ) -> ClusterResult<PostConsensusOutcome> {
        let runner = self.runner(validator, role).ok_or_else(|| {
            ClusterError::UnroutableMessage(format!(
                "no {} runner for validator {} in cluster {}",
                role, validator, self.cluster_id
            ))
        })?;
        runner.process_post_consensus(msg)
    }

    /// Release engine state held by this cluster.
    pub fn shutdown(&self) {
        self.consensus.shutdown();
    }

    /// Invoke `upon_decided` on every runner with a duty for the decided slot.
    ///
    /// Runners are independent: one failure is reported and the rest proceed.
    async fn fan_out(&self, decision: Decision) -> DecisionReport {
        let (keys, abandoned) = {
            let mut slot_runners = self.slot_runners.lock();
            let keys = slot_runners.remove(&decision.slot).unwrap_or_default();
            let abandoned: Vec<(Slot, BTreeSet<RunnerKey>)> = decision
                .abandoned
                .iter()
                .filter_map(|slot| slot_runners.remove(slot).map(|keys| (*slot, keys)))
                .collect();
            (keys, abandoned)
        };
        let runners: Vec<(RunnerKey, Arc<PartialSigRunner>)> = {
            let runners = self.runners.read();
            for (slot, keys) in &abandoned {
                for runner in keys.iter().filter_map(|key| runners.get(key)) {
                    runner.retire(*slot);
                }
            }
            keys.into_iter()
                .filter_map(|key| runners.get(&key).map(|runner| (key, runner.clone())))
                .collect()
        };

        let results = join_all(
            runners
                .iter()
                .map(|(_, runner)| runner.upon_decided(&decision.value)),
        )
        .await;

        let mut report = DecisionReport::new(decision);
        for ((key, _), result) in runners.iter().zip(results) {
            match result {
                Ok(UponDecidedOutcome::Signed) => report.signed.push(*key),
                Ok(UponDecidedOutcome::Unchanged) => report.unchanged.push(*key),
                Ok(UponDecidedOutcome::Finalized(finalized)) => {
                    report.signed.push(*key);
                    report.finalized.push(finalized);
                }
                Err(e) => {
                    warn!(
                        "[qc-18] Runner {} of {} failed on slot {}: {}",
                        key.role, key.validator, report.decision.slot, e
                    );
                    report.failed.push((*key, e));
                }
            }
        }

        self.consensus.reset();
        info!(
            "[qc-18] Cluster {} fanned out slot {}: {} signed, {} failed",
            self.cluster_id,
            report.decision.slot,
            report.signed.len(),
            report.failed.len()
        );
        report
    }
}
