//! In-memory network adapter
//!
//! Records every broadcast so tests and single-process simulations can
//! deliver messages by hand.

use crate::events::{ConsensusMessage, MessageType, NetworkMessage, PartialSignatureMessage};
use crate::ports::Network;
use async_trait::async_trait;

/// In-memory network adapter for testing
pub struct InMemoryNetwork {
    sent: parking_lot::RwLock<Vec<NetworkMessage>>,
    fail_broadcasts: parking_lot::RwLock<bool>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self {
            sent: parking_lot::RwLock::new(Vec::new()),
            fail_broadcasts: parking_lot::RwLock::new(false),
        }
    }

    /// Every envelope broadcast so far
    pub fn sent(&self) -> Vec<NetworkMessage> {
        self.sent.read().clone()
    }

    pub fn consensus_messages(&self) -> Vec<ConsensusMessage> {
        self.sent
            .read()
            .iter()
            .filter(|m| m.msg_type == MessageType::Consensus)
            .filter_map(|m| m.decode_consensus().ok())
            .collect()
    }

    pub fn partial_signature_messages(&self) -> Vec<PartialSignatureMessage> {
        self.sent
            .read()
            .iter()
            .filter(|m| m.msg_type == MessageType::PartialSignature)
            .filter_map(|m| m.decode_partial_signature().ok())
            .collect()
    }

    /// Drain the recorded envelopes.
    pub fn take(&self) -> Vec<NetworkMessage> {
        std::mem::take(&mut *self.sent.write())
    }

    pub fn clear(&self) {
        self.sent.write().clear();
    }

    /// Make subsequent broadcasts fail (messages are not recorded).
    pub fn set_failing(&self, failing: bool) {
        *self.fail_broadcasts.write() = failing;
    }
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Network for InMemoryNetwork {
    async fn broadcast(&self, msg: NetworkMessage) -> Result<(), String> {
        if *self.fail_broadcasts.read() {
            return Err("network unavailable".into());
        }
        self.sent.write().push(msg);
        Ok(())
    }
}
