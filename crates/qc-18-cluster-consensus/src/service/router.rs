//! Cluster Router - node-level entry point
//!
//! Maps ClusterIds and validator keys to clusters, splits scheduler duties
//! per cluster and routes inbound network messages by their MessageId.

use super::cluster::{Cluster, ClusterDependencies};
use crate::domain::{
    decode_message_id, derive_cluster_id, ClusterConfig, ClusterError, ClusterId, ClusterResult,
    Duty, OperatorId, Recipient, Slot, ValidatorPubkey, ValidatorShare,
};
use crate::events::{DutyStartOutcome, MessageType, NetworkMessage, RoutingOutcome};
use crate::ports::{DutyApi, MessageHandler};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routes duties and messages to the clusters this operator belongs to
pub struct ClusterRouter {
    operator: OperatorId,
    config: ClusterConfig,
    deps: ClusterDependencies,
    clusters: RwLock<HashMap<ClusterId, Arc<Cluster>>>,
    validators: RwLock<HashMap<ValidatorPubkey, ClusterId>>,
}

impl ClusterRouter {
    pub fn new(operator: OperatorId, config: ClusterConfig, deps: ClusterDependencies) -> Self {
        Self {
            operator,
            config,
            deps,
            clusters: RwLock::new(HashMap::new()),
            validators: RwLock::new(HashMap::new()),
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn cluster(&self, cluster_id: &ClusterId) -> Option<Arc<Cluster>> {
        self.clusters.read().get(cluster_id).cloned()
    }

    pub fn cluster_of(&self, validator: &ValidatorPubkey) -> Option<ClusterId> {
        self.validators.read().get(validator).copied()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.read().len()
    }

    /// Register a validator, creating its cluster on first use.
    pub fn register_validator(&self, share: ValidatorShare) -> ClusterResult<ClusterId> {
        let operators: Vec<OperatorId> = share.operator_ids().into_iter().collect();
        let cluster_id = derive_cluster_id(&operators)?;
        let validator = share.validator_pubkey;

        let mut clusters = self.clusters.write();
        let mut validators = self.validators.write();
        if let Some(existing) = validators.get(&validator) {
            if *existing != cluster_id {
                return Err(ClusterError::InvalidInput(format!(
                    "validator {} already belongs to cluster {}",
                    validator, existing
                )));
            }
        }

        let cluster = match clusters.get(&cluster_id) {
            Some(cluster) => cluster.clone(),
            None => {
                let cluster = Arc::new(Cluster::new(
                    &operators,
                    self.operator,
                    self.config.clone(),
                    self.deps.clone(),
                )?);
                info!(
                    "[qc-18] Created cluster {} with {} operators",
                    cluster_id,
                    operators.len()
                );
                clusters.insert(cluster_id, cluster.clone());
                cluster
            }
        };

        if let Err(e) = cluster.add_validator(share) {
            if cluster.is_empty() {
                clusters.remove(&cluster_id);
            }
            return Err(e);
        }
        validators.insert(validator, cluster_id);
        Ok(cluster_id)
    }

    /// Remove a validator; its cluster goes away with its last validator.
    pub fn remove_validator(&self, validator: &ValidatorPubkey) -> Option<ClusterId> {
        let mut clusters = self.clusters.write();
        let cluster_id = self.validators.write().remove(validator)?;

        if let Some(cluster) = clusters.get(&cluster_id).cloned() {
            cluster.remove_validator(validator);
            if cluster.is_empty() {
                clusters.remove(&cluster_id);
                cluster.shutdown();
                info!("[qc-18] Dropped cluster {} with its last validator", cluster_id);
            }
        }
        Some(cluster_id)
    }

    fn drop_message(&self, reason: ClusterError) -> RoutingOutcome {
        crate::metrics::record_message_dropped(reason.label());
        if reason.is_peer_fault() {
            warn!("[qc-18] Dropping message: {}", reason);
        } else {
            debug!("[qc-18] Dropping message: {}", reason);
        }
        RoutingOutcome::Dropped(reason)
    }
}

#[async_trait]
impl DutyApi for ClusterRouter {
    async fn start_duties(
        &self,
        duties: Vec<Duty>,
        slot: Slot,
    ) -> ClusterResult<Vec<ClusterResult<DutyStartOutcome>>> {
        if duties.is_empty() {
            return Err(ClusterError::NoDuties(slot));
        }

        let mut results = Vec::new();
        let mut grouped: BTreeMap<ClusterId, Vec<Duty>> = BTreeMap::new();
        {
            let validators = self.validators.read();
            for duty in duties {
                match validators.get(&duty.validator_pubkey) {
                    Some(cluster_id) => grouped.entry(*cluster_id).or_default().push(duty),
                    None => results.push(Err(ClusterError::InvalidInput(format!(
                        "validator {} is not registered",
                        duty.validator_pubkey
                    )))),
                }
            }
        }

        let starts: Vec<(Arc<Cluster>, Vec<Duty>)> = {
            let clusters = self.clusters.read();
            grouped
                .into_iter()
                .filter_map(|(cluster_id, duties)| {
                    clusters.get(&cluster_id).map(|cluster| (cluster.clone(), duties))
                })
                .collect()
        };

        // Clusters share nothing mutable, so they start concurrently
        let outcomes = join_all(
            starts
                .into_iter()
                .map(|(cluster, duties)| async move { cluster.start_duties(duties, slot).await }),
        )
        .await;
        results.extend(outcomes);
        Ok(results)
    }
}

#[async_trait]
impl MessageHandler for ClusterRouter {
    async fn handle_message(&self, msg: NetworkMessage) -> ClusterResult<RoutingOutcome> {
        let (domain, role, recipient) = match decode_message_id(&msg.message_id) {
            Ok(parts) => parts,
            Err(e) => return Ok(self.drop_message(e)),
        };
        if domain != self.config.domain {
            return Ok(self.drop_message(ClusterError::UnroutableMessage(format!(
                "domain {} is not {}",
                domain, self.config.domain
            ))));
        }

        match (msg.msg_type, recipient) {
            (MessageType::Consensus, Recipient::Cluster(cluster_id)) => {
                let Some(cluster) = self.cluster(&cluster_id) else {
                    return Ok(self.drop_message(ClusterError::UnroutableMessage(format!(
                        "unknown cluster {}",
                        cluster_id
                    ))));
                };
                let consensus = match msg.decode_consensus() {
                    Ok(consensus) => consensus,
                    Err(e) => return Ok(self.drop_message(e)),
                };
                let report = cluster.process_consensus(&consensus).await?;
                Ok(RoutingOutcome::Consensus(report))
            }
            (MessageType::PartialSignature, Recipient::Validator(validator)) => {
                let Some(cluster) = self
                    .cluster_of(&validator)
                    .and_then(|cluster_id| self.cluster(&cluster_id))
                else {
                    return Ok(self.drop_message(ClusterError::UnroutableMessage(format!(
                        "unknown validator {}",
                        validator
                    ))));
                };
                let partial = match msg.decode_partial_signature() {
                    Ok(partial) => partial,
                    Err(e) => return Ok(self.drop_message(e)),
                };
                match cluster.process_partial_signature(&validator, role, &partial) {
                    Ok(outcome) => Ok(RoutingOutcome::PartialSignature(outcome)),
                    Err(e @ ClusterError::UnroutableMessage(_)) => Ok(self.drop_message(e)),
                    Err(e) => Err(e),
                }
            }
            (msg_type, _) => Ok(self.drop_message(ClusterError::UnroutableMessage(format!(
                "{:?} message addressed with role {}",
                msg_type, role
            )))),
        }
    }
}
