//! Per-cluster consensus instance state machine
//!
//! ```text
//! Idle ──start(s)──→ Running(s) ──decided──→ Decided(s, v) ──start(s')──→ Running(s')
//!                        │
//!                        └──start(s' > s)──→ Running(s')   (s is superseded, not aborted)
//! ```

use super::{ClusterError, ClusterResult, ConsensusData, Root, Slot};
use std::collections::{BTreeMap, BTreeSet};

/// Current state of a cluster's consensus instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Idle,
    Running { slot: Slot },
    Decided { slot: Slot, value: ConsensusData },
}

impl InstanceState {
    pub fn running_slot(&self) -> Option<Slot> {
        match self {
            InstanceState::Running { slot } => Some(*slot),
            _ => None,
        }
    }
}

/// Guarded transitions of the consensus instance plus decision bookkeeping.
#[derive(Debug)]
pub struct InstanceTracker {
    state: InstanceState,
    highest_decided: Option<Slot>,
    /// Lower slots still pending in the engine after a newer slot started
    superseded: BTreeSet<Slot>,
    /// Recently decided slots and the root of their value
    decided: BTreeMap<Slot, Root>,
    history: usize,
}

/// Result of beginning a new slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Begin {
    /// Running slot pushed aside by the new one
    pub superseded: Option<Slot>,
    /// Superseded slots dropped for falling out of the history window
    pub evicted: Vec<Slot>,
}

/// Which instance a message for a given slot belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceMatch {
    Current,
    Superseded,
}

impl InstanceTracker {
    pub fn new(history: usize) -> Self {
        Self {
            state: InstanceState::Idle,
            highest_decided: None,
            superseded: BTreeSet::new(),
            decided: BTreeMap::new(),
            history: history.max(1),
        }
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn highest_decided(&self) -> Option<Slot> {
        self.highest_decided
    }

    pub fn decided_root(&self, slot: Slot) -> Option<Root> {
        self.decided.get(&slot).copied()
    }

    pub fn superseded_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.superseded.iter().copied()
    }

    /// Reject a start for `slot` unless it is newer than every decided and running slot.
    pub fn check_start(&self, slot: Slot) -> ClusterResult<()> {
        if let Some(highest) = self.highest_decided {
            if slot <= highest {
                return Err(ClusterError::StaleSlot { slot, highest });
            }
        }
        if let Some(running) = self.state.running_slot() {
            if slot <= running {
                return Err(ClusterError::StaleSlot {
                    slot,
                    highest: running,
                });
            }
        }
        Ok(())
    }

    /// Transition to `Running(slot)`; a lower running slot becomes superseded.
    ///
    /// Superseded slots further than the history window below `slot` are
    /// evicted and can no longer decide.
    pub fn begin(&mut self, slot: Slot) -> ClusterResult<Begin> {
        self.check_start(slot)?;
        let superseded = self.state.running_slot();
        if let Some(previous) = superseded {
            self.superseded.insert(previous);
        }
        self.state = InstanceState::Running { slot };

        let horizon = slot.saturating_sub(self.history as Slot);
        let retained = self.superseded.split_off(&horizon);
        let evicted = std::mem::replace(&mut self.superseded, retained);
        Ok(Begin {
            superseded,
            evicted: evicted.into_iter().collect(),
        })
    }

    /// Classify an inbound message slot.
    pub fn match_slot(&self, slot: Slot) -> ClusterResult<InstanceMatch> {
        if self.decided.contains_key(&slot) {
            return Err(ClusterError::AlreadyDecided(slot));
        }
        if let Some(highest) = self.highest_decided {
            if slot <= highest {
                return Err(ClusterError::StaleSlot { slot, highest });
            }
        }
        if self.state.running_slot() == Some(slot) {
            return Ok(InstanceMatch::Current);
        }
        if self.superseded.contains(&slot) {
            return Ok(InstanceMatch::Superseded);
        }
        Err(ClusterError::NoRunningInstance(slot))
    }

    /// Record a decision. Returns superseded slots that can no longer decide.
    pub fn decide(&mut self, slot: Slot, value: &ConsensusData) -> ClusterResult<Vec<Slot>> {
        match self.match_slot(slot)? {
            InstanceMatch::Current => {
                self.state = InstanceState::Decided {
                    slot,
                    value: value.clone(),
                };
            }
            InstanceMatch::Superseded => {
                self.superseded.remove(&slot);
            }
        }

        self.highest_decided = Some(self.highest_decided.map_or(slot, |h| h.max(slot)));
        self.decided.insert(slot, value.root());
        while self.decided.len() > self.history {
            self.decided.pop_first();
        }

        // Superseded rounds at or below the new high-water mark are dead
        let dead: Vec<Slot> = self.superseded.range(..=slot).copied().collect();
        for dead_slot in &dead {
            self.superseded.remove(dead_slot);
        }
        Ok(dead)
    }

    /// Undo `begin(slot)` after the engine refused to start the instance.
    pub fn abandon(&mut self, slot: Slot) {
        if self.state.running_slot() == Some(slot) {
            self.state = InstanceState::Idle;
        }
    }

    /// Back to `Idle` without touching decision history.
    pub fn reset(&mut self) {
        if let InstanceState::Decided { .. } = self.state {
            self.state = InstanceState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(slot: Slot) -> ConsensusData {
        ConsensusData {
            slot,
            attestation: None,
            sync_committee_block_root: Some([slot as u8; 32]),
        }
    }

    #[test]
    fn test_idle_to_running_to_decided() {
        let mut tracker = InstanceTracker::new(8);
        assert_eq!(tracker.state(), &InstanceState::Idle);

        tracker.begin(10).unwrap();
        assert_eq!(tracker.state().running_slot(), Some(10));

        tracker.decide(10, &data(10)).unwrap();
        assert!(matches!(tracker.state(), InstanceState::Decided { slot: 10, .. }));
        assert_eq!(tracker.highest_decided(), Some(10));

        tracker.reset();
        assert_eq!(tracker.state(), &InstanceState::Idle);
        assert_eq!(tracker.highest_decided(), Some(10));
    }

    #[test]
    fn test_stale_start_rejected() {
        let mut tracker = InstanceTracker::new(8);
        tracker.begin(10).unwrap();
        tracker.decide(10, &data(10)).unwrap();

        assert_eq!(
            tracker.begin(10).unwrap_err(),
            ClusterError::StaleSlot { slot: 10, highest: 10 }
        );
        assert!(tracker.begin(9).is_err());
        assert!(tracker.begin(11).is_ok());
        assert_eq!(
            tracker.begin(11).unwrap_err(),
            ClusterError::StaleSlot { slot: 11, highest: 11 }
        );
    }

    #[test]
    fn test_second_decision_rejected() {
        let mut tracker = InstanceTracker::new(8);
        tracker.begin(3).unwrap();
        tracker.decide(3, &data(3)).unwrap();
        assert_eq!(
            tracker.decide(3, &data(3)).unwrap_err(),
            ClusterError::AlreadyDecided(3)
        );
    }

    #[test]
    fn test_superseded_late_decision_accepted() {
        let mut tracker = InstanceTracker::new(8);
        tracker.begin(5).unwrap();
        assert_eq!(tracker.begin(6).unwrap().superseded, Some(5));
        assert_eq!(tracker.match_slot(5).unwrap(), InstanceMatch::Superseded);

        tracker.decide(5, &data(5)).unwrap();
        // Still running the newer slot
        assert_eq!(tracker.state().running_slot(), Some(6));
        assert_eq!(tracker.highest_decided(), Some(5));

        tracker.decide(6, &data(6)).unwrap();
        assert_eq!(tracker.highest_decided(), Some(6));
    }

    #[test]
    fn test_superseded_dies_after_newer_decision() {
        let mut tracker = InstanceTracker::new(8);
        tracker.begin(5).unwrap();
        tracker.begin(6).unwrap();

        let dead = tracker.decide(6, &data(6)).unwrap();
        assert_eq!(dead, vec![5]);
        assert_eq!(
            tracker.match_slot(5).unwrap_err(),
            ClusterError::StaleSlot { slot: 5, highest: 6 }
        );
    }

    #[test]
    fn test_superseded_slots_bounded_without_decisions() {
        let mut tracker = InstanceTracker::new(4);
        let mut evicted = Vec::new();
        for slot in 1..=20 {
            evicted.extend(tracker.begin(slot).unwrap().evicted);
        }
        let superseded: Vec<Slot> = tracker.superseded_slots().collect();
        assert_eq!(superseded, vec![16, 17, 18, 19]);
        assert_eq!(evicted, (1..=15).collect::<Vec<Slot>>());
        assert!(matches!(
            tracker.match_slot(3).unwrap_err(),
            ClusterError::NoRunningInstance(3)
        ));
    }

    #[test]
    fn test_unknown_slot() {
        let mut tracker = InstanceTracker::new(8);
        tracker.begin(5).unwrap();
        assert_eq!(
            tracker.match_slot(9).unwrap_err(),
            ClusterError::NoRunningInstance(9)
        );
    }

    #[test]
    fn test_history_bounded() {
        let mut tracker = InstanceTracker::new(2);
        for slot in 1..=4 {
            tracker.begin(slot).unwrap();
            tracker.decide(slot, &data(slot)).unwrap();
        }
        assert!(tracker.decided_root(1).is_none());
        assert!(tracker.decided_root(3).is_some());
        assert!(tracker.decided_root(4).is_some());
        // Evicted slots are still stale
        assert!(matches!(
            tracker.match_slot(1).unwrap_err(),
            ClusterError::StaleSlot { .. }
        ));
    }
}
