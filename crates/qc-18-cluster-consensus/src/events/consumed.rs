//! Wire messages exchanged between cluster operators
//!
//! Every message travels inside a `NetworkMessage` envelope whose MessageId
//! decides routing. Typed payloads are bincode-encoded.

use crate::domain::{BlsSignature, ClusterResult, MessageId, OperatorId, Root, Slot};
use serde::{Deserialize, Serialize};

/// Kind of payload carried by a `NetworkMessage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Agreement engine traffic for a cluster's consensus instance
    Consensus,
    /// Post-consensus partial signature for one validator
    PartialSignature,
}

/// Transport envelope.
///
/// `message_id` stays raw so malformed identifiers from peers can be
/// rejected by the router instead of failing deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub msg_type: MessageType,
    pub message_id: Vec<u8>,
    pub data: Vec<u8>,
}

impl NetworkMessage {
    pub fn consensus(message_id: MessageId, msg: &ConsensusMessage) -> ClusterResult<Self> {
        Ok(Self {
            msg_type: MessageType::Consensus,
            message_id: message_id.as_bytes().to_vec(),
            data: bincode::serialize(msg)?,
        })
    }

    pub fn partial_signature(
        message_id: MessageId,
        msg: &PartialSignatureMessage,
    ) -> ClusterResult<Self> {
        Ok(Self {
            msg_type: MessageType::PartialSignature,
            message_id: message_id.as_bytes().to_vec(),
            data: bincode::serialize(msg)?,
        })
    }

    pub fn decode_consensus(&self) -> ClusterResult<ConsensusMessage> {
        Ok(bincode::deserialize(&self.data)?)
    }

    pub fn decode_partial_signature(&self) -> ClusterResult<PartialSignatureMessage> {
        Ok(bincode::deserialize(&self.data)?)
    }
}

/// Agreement engine message for one slot of a cluster's instance.
///
/// The payload is opaque to this crate and interpreted by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub slot: Slot,
    pub round: u64,
    pub signer: OperatorId,
    pub payload: Vec<u8>,
}

/// One operator's partial signature for one validator duty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignatureMessage {
    pub slot: Slot,
    pub signer: OperatorId,
    pub signing_root: Root,
    pub partial_signature: BlsSignature,
}
