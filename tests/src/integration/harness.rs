//! # Multi-operator harness
//!
//! Every operator runs its own `ClusterRouter` with in-memory adapters.
//! `pump` plays the transport: it drains each node's outbox and delivers
//! every envelope to every other online node until the system is quiet.

use qc_18_cluster_consensus::adapters::{
    CommitQuorumEngine, HashShareSigner, InMemoryNetwork, StaticBeaconNode,
};
use qc_18_cluster_consensus::domain::{ClusterConfig, ClusterError, Duty, OperatorId, Slot, ValidatorPubkey};
use qc_18_cluster_consensus::events::{DutyStartOutcome, NetworkMessage, RoutingOutcome};
use qc_18_cluster_consensus::ports::{duty_agnostic_check, DutyApi, MessageHandler};
use qc_18_cluster_consensus::{ClusterDependencies, ClusterResult, ClusterRouter};
use std::collections::HashSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Delivery rounds before `pump` gives up.
const MAX_PUMP_ROUNDS: usize = 32;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn validator(n: u8) -> ValidatorPubkey {
    ValidatorPubkey([n; 48])
}

/// One operator's node.
pub struct OperatorNode {
    pub operator: OperatorId,
    pub router: ClusterRouter,
    pub network: Arc<InMemoryNetwork>,
}

/// A validator and the operators holding its key shares.
pub struct ValidatorSpec {
    pub pubkey: ValidatorPubkey,
    pub index: u64,
    pub committee: Vec<u64>,
}

impl ValidatorSpec {
    pub fn new(n: u8, committee: &[u64]) -> Self {
        Self {
            pubkey: validator(n),
            index: n as u64,
            committee: committee.to_vec(),
        }
    }
}

pub struct Testbed {
    pub nodes: Vec<OperatorNode>,
    pub config: ClusterConfig,
    offline: HashSet<OperatorId>,
}

impl Testbed {
    pub fn new(validators: &[ValidatorSpec]) -> Self {
        let config = ClusterConfig::for_testing();
        let beacon = Arc::new(StaticBeaconNode::new());

        let mut operators: Vec<u64> = validators
            .iter()
            .flat_map(|entry| entry.committee.iter().copied())
            .collect();
        operators.sort_unstable();
        operators.dedup();

        let nodes = operators
            .into_iter()
            .map(|id| {
                let operator = OperatorId(id);
                let network = Arc::new(InMemoryNetwork::new());
                let signer = Arc::new(HashShareSigner::new(operator));
                let deps = ClusterDependencies {
                    beacon: beacon.clone(),
                    signer: signer.clone(),
                    verifier: signer,
                    network: network.clone(),
                    engine: Arc::new(CommitQuorumEngine::new(operator)),
                    value_check: duty_agnostic_check(),
                };
                let router = ClusterRouter::new(operator, config.clone(), deps);
                for entry in validators.iter().filter(|entry| entry.committee.contains(&id)) {
                    let committee: Vec<OperatorId> =
                        entry.committee.iter().copied().map(OperatorId).collect();
                    router
                        .register_validator(HashShareSigner::validator_share(
                            entry.pubkey,
                            entry.index,
                            &committee,
                        ))
                        .expect("valid share");
                }
                OperatorNode {
                    operator,
                    router,
                    network,
                }
            })
            .collect();

        Self {
            nodes,
            config,
            offline: HashSet::new(),
        }
    }

    pub fn node(&self, operator: u64) -> &OperatorNode {
        self.nodes
            .iter()
            .find(|node| node.operator == OperatorId(operator))
            .expect("operator in testbed")
    }

    /// Take an operator off the network: it neither starts duties nor receives.
    pub fn set_offline(&mut self, operator: u64) {
        self.offline.insert(OperatorId(operator));
    }

    fn online(&self) -> impl Iterator<Item = &OperatorNode> {
        self.nodes
            .iter()
            .filter(|node| !self.offline.contains(&node.operator))
    }

    /// Hand each online node the duties of the validators it manages.
    pub async fn start_duties(
        &self,
        duties: &[Duty],
        slot: Slot,
    ) -> Vec<(OperatorId, ClusterResult<DutyStartOutcome>)> {
        let mut results = Vec::new();
        for node in self.online() {
            let own: Vec<Duty> = duties
                .iter()
                .filter(|duty| node.router.cluster_of(&duty.validator_pubkey).is_some())
                .cloned()
                .collect();
            if own.is_empty() {
                continue;
            }
            let outcomes = node
                .router
                .start_duties(own, slot)
                .await
                .expect("non-empty duties");
            results.extend(outcomes.into_iter().map(|outcome| (node.operator, outcome)));
        }
        results
    }

    /// Deliver one envelope to every online node except the sender.
    pub async fn deliver(
        &self,
        from: OperatorId,
        msg: &NetworkMessage,
    ) -> Vec<(OperatorId, ClusterResult<RoutingOutcome>)> {
        let mut results = Vec::new();
        for node in self.online().filter(|node| node.operator != from) {
            results.push((node.operator, node.router.handle_message(msg.clone()).await));
        }
        results
    }

    /// Exchange messages until no node has anything left to send.
    ///
    /// Returns every rejection seen on the way; late or surplus messages
    /// (e.g. `AlreadyDecided`) are expected there.
    pub async fn pump(&self) -> Vec<(OperatorId, ClusterError)> {
        let mut rejections = Vec::new();
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut pending = Vec::new();
            for node in self.nodes.iter() {
                let outbox = node.network.take();
                if !self.offline.contains(&node.operator) {
                    pending.extend(outbox.into_iter().map(|msg| (node.operator, msg)));
                }
            }
            if pending.is_empty() {
                return rejections;
            }

            for (from, msg) in pending {
                for (to, result) in self.deliver(from, &msg).await {
                    match result {
                        Ok(RoutingOutcome::Dropped(e)) | Err(e) => rejections.push((to, e)),
                        Ok(_) => {}
                    }
                }
            }
        }
        panic!("network did not settle after {} rounds", MAX_PUMP_ROUNDS);
    }
}
