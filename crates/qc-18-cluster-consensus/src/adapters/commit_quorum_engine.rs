//! Commit-quorum agreement engine
//!
//! A single-round engine for tests and local simulations: every operator
//! broadcasts a commit for its proposed value, and an instance decides once
//! a quorum of distinct committee members committed to the same value. The
//! quorum is derived from the committee each instance is started with. It
//! offers no liveness under faults and is not a BFT protocol.

use crate::domain::{quorum, ClusterResult, ConsensusData, OperatorId, Root, Slot};
use crate::events::ConsensusMessage;
use crate::ports::{AgreementEngine, EngineOutput, InstanceId, ValueCheck};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

struct CommitInstance {
    check: ValueCheck,
    committee: BTreeSet<OperatorId>,
    quorum: usize,
    /// First commit of each signer; later ones are ignored
    votes: HashMap<OperatorId, ConsensusData>,
    decided: bool,
}

impl CommitInstance {
    fn tally(&mut self) -> Option<ConsensusData> {
        if self.decided {
            return None;
        }
        let mut counts: HashMap<Root, (usize, &ConsensusData)> = HashMap::new();
        for value in self.votes.values() {
            counts.entry(value.root()).or_insert((0, value)).0 += 1;
        }
        let winner = counts
            .into_values()
            .find(|(count, _)| *count >= self.quorum)
            .map(|(_, value)| value.clone())?;
        self.decided = true;
        Some(winner)
    }
}

/// In-process agreement engine deciding on a quorum of matching commits
pub struct CommitQuorumEngine {
    operator: OperatorId,
    instances: Mutex<HashMap<InstanceId, CommitInstance>>,
}

impl CommitQuorumEngine {
    pub fn new(operator: OperatorId) -> Self {
        Self {
            operator,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Build the commit a signer broadcasts for `value`.
    pub fn commit_message(
        slot: Slot,
        round: u64,
        signer: OperatorId,
        value: &ConsensusData,
    ) -> ClusterResult<ConsensusMessage> {
        Ok(ConsensusMessage {
            slot,
            round,
            signer,
            payload: bincode::serialize(value)?,
        })
    }

    /// Decode the value carried by a commit payload.
    pub fn decode_value(payload: &[u8]) -> ClusterResult<ConsensusData> {
        Ok(bincode::deserialize(payload)?)
    }

    /// Number of instances currently held
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl AgreementEngine for CommitQuorumEngine {
    fn start_instance(
        &self,
        instance: &InstanceId,
        committee: &[OperatorId],
        value: ConsensusData,
        check: ValueCheck,
    ) -> Result<EngineOutput, String> {
        let committee: BTreeSet<OperatorId> = committee.iter().copied().collect();
        if !committee.contains(&self.operator) {
            return Err(format!(
                "operator {} is not in the committee of slot {}",
                self.operator, instance.slot
            ));
        }
        let commit = Self::commit_message(instance.slot, 0, self.operator, &value)
            .map_err(|e| e.to_string())?;

        let mut instances = self.instances.lock();
        if instances.contains_key(instance) {
            return Err(format!("instance for slot {} already started", instance.slot));
        }
        let mut state = CommitInstance {
            check,
            quorum: quorum(committee.len()),
            committee,
            votes: HashMap::new(),
            decided: false,
        };
        state.votes.insert(self.operator, value);
        let decided = state.tally();
        instances.insert(*instance, state);

        Ok(EngineOutput {
            outbound: vec![commit],
            decided,
        })
    }

    fn process_message(
        &self,
        instance: &InstanceId,
        msg: &ConsensusMessage,
    ) -> Result<EngineOutput, String> {
        if msg.slot != instance.slot {
            return Err(format!(
                "message for slot {} fed to instance of slot {}",
                msg.slot, instance.slot
            ));
        }
        let value = Self::decode_value(&msg.payload).map_err(|e| e.to_string())?;

        let mut instances = self.instances.lock();
        let state = instances
            .get_mut(instance)
            .ok_or_else(|| format!("no instance for slot {}", instance.slot))?;

        if !state.committee.contains(&msg.signer) {
            return Err(format!(
                "commit from operator {} outside the committee of slot {}",
                msg.signer, instance.slot
            ));
        }
        if value.slot != instance.slot {
            debug!(
                "[qc-18] Ignoring commit from {} for value of slot {}",
                msg.signer, value.slot
            );
            return Ok(EngineOutput::default());
        }
        if let Err(reason) = (state.check)(&value) {
            debug!("[qc-18] Ignoring commit from {}: {}", msg.signer, reason);
            return Ok(EngineOutput::default());
        }

        state.votes.entry(msg.signer).or_insert(value);
        Ok(EngineOutput {
            outbound: Vec::new(),
            decided: state.tally(),
        })
    }

    fn drop_instance(&self, instance: &InstanceId) {
        self.instances.lock().remove(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{derive_cluster_id, ClusterId};
    use crate::ports::duty_agnostic_check;

    fn committee() -> Vec<OperatorId> {
        (1..=4).map(OperatorId).collect()
    }

    fn instance(slot: Slot) -> InstanceId {
        let cluster_id: ClusterId = derive_cluster_id(&committee()).unwrap();
        InstanceId { cluster_id, slot }
    }

    fn value(slot: Slot, byte: u8) -> ConsensusData {
        ConsensusData {
            slot,
            attestation: None,
            sync_committee_block_root: Some([byte; 32]),
        }
    }

    fn started(slot: Slot) -> (CommitQuorumEngine, InstanceId) {
        let engine = CommitQuorumEngine::new(OperatorId(1));
        let id = instance(slot);
        engine
            .start_instance(&id, &committee(), value(slot, 1), duty_agnostic_check())
            .unwrap();
        (engine, id)
    }

    #[test]
    fn test_single_operator_decides_on_start() {
        let engine = CommitQuorumEngine::new(OperatorId(1));
        let output = engine
            .start_instance(&instance(5), &[OperatorId(1)], value(5, 1), duty_agnostic_check())
            .unwrap();
        assert_eq!(output.outbound.len(), 1);
        assert_eq!(output.decided, Some(value(5, 1)));
    }

    #[test]
    fn test_decides_on_matching_quorum_only() {
        let (engine, id) = started(5);

        let other = CommitQuorumEngine::commit_message(5, 0, OperatorId(2), &value(5, 9)).unwrap();
        assert!(engine.process_message(&id, &other).unwrap().decided.is_none());

        let same = CommitQuorumEngine::commit_message(5, 0, OperatorId(3), &value(5, 1)).unwrap();
        assert!(engine.process_message(&id, &same).unwrap().decided.is_none());

        let last = CommitQuorumEngine::commit_message(5, 0, OperatorId(4), &value(5, 1)).unwrap();
        assert_eq!(engine.process_message(&id, &last).unwrap().decided, Some(value(5, 1)));

        // Decided instances stay silent
        let again = CommitQuorumEngine::commit_message(5, 0, OperatorId(2), &value(5, 1)).unwrap();
        assert!(engine.process_message(&id, &again).unwrap().decided.is_none());
    }

    #[test]
    fn test_commits_from_outside_committee_never_count() {
        let (engine, id) = started(9);
        for outsider in [98, 99] {
            let msg =
                CommitQuorumEngine::commit_message(9, 0, OperatorId(outsider), &value(9, 1)).unwrap();
            assert!(engine.process_message(&id, &msg).is_err());
        }

        let member = CommitQuorumEngine::commit_message(9, 0, OperatorId(2), &value(9, 1)).unwrap();
        assert!(engine.process_message(&id, &member).unwrap().decided.is_none());
    }

    #[test]
    fn test_quorum_follows_committee_size() {
        let engine = CommitQuorumEngine::new(OperatorId(1));
        let seven: Vec<OperatorId> = (1..=7).map(OperatorId).collect();
        let id = instance(11);
        engine
            .start_instance(&id, &seven, value(11, 1), duty_agnostic_check())
            .unwrap();

        for signer in 2..=4 {
            let msg =
                CommitQuorumEngine::commit_message(11, 0, OperatorId(signer), &value(11, 1)).unwrap();
            assert!(engine.process_message(&id, &msg).unwrap().decided.is_none());
        }
        let fifth = CommitQuorumEngine::commit_message(11, 0, OperatorId(5), &value(11, 1)).unwrap();
        assert!(engine.process_message(&id, &fifth).unwrap().decided.is_some());
    }

    #[test]
    fn test_start_outside_committee_rejected() {
        let engine = CommitQuorumEngine::new(OperatorId(9));
        assert!(engine
            .start_instance(&instance(3), &committee(), value(3, 1), duty_agnostic_check())
            .is_err());
        assert_eq!(engine.instance_count(), 0);
    }

    #[test]
    fn test_repeated_signer_counts_once() {
        let (engine, id) = started(6);
        for _ in 0..3 {
            let msg = CommitQuorumEngine::commit_message(6, 0, OperatorId(2), &value(6, 1)).unwrap();
            assert!(engine.process_message(&id, &msg).unwrap().decided.is_none());
        }
    }

    #[test]
    fn test_vetoed_values_are_ignored() {
        let (engine, id) = started(7);
        let empty = ConsensusData::new(7);
        let msg = CommitQuorumEngine::commit_message(7, 0, OperatorId(2), &empty).unwrap();
        assert_eq!(engine.process_message(&id, &msg).unwrap(), EngineOutput::default());
    }

    #[test]
    fn test_unknown_and_dropped_instances() {
        let engine = CommitQuorumEngine::new(OperatorId(1));
        let id = instance(8);
        let msg = CommitQuorumEngine::commit_message(8, 0, OperatorId(2), &value(8, 1)).unwrap();
        assert!(engine.process_message(&id, &msg).is_err());

        engine
            .start_instance(&id, &committee(), value(8, 1), duty_agnostic_check())
            .unwrap();
        assert!(engine
            .start_instance(&id, &committee(), value(8, 1), duty_agnostic_check())
            .is_err());
        assert_eq!(engine.instance_count(), 1);
        engine.drop_instance(&id);
        assert_eq!(engine.instance_count(), 0);
    }
}
