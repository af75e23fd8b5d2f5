//! Cluster and message identifiers
//!
//! ## ClusterId
//!
//! ```text
//! ClusterId = CLUSTER_ID_PREFIX (16) ‖ SHA-256(sorted operator ids, u64 LE each) (32)
//! ```
//!
//! ## MessageId
//!
//! ```text
//! bytes[0..4]   domain
//! bytes[4..8]   role (u32, little-endian)
//! bytes[8..56]  recipient (ClusterId for Role::Committee, validator public key otherwise)
//! ```
//!
//! Both recipient kinds are exactly 48 bytes, so the layout does not depend
//! on the role. The role is decoded first and decides how the recipient is
//! interpreted.

use super::{ClusterError, ClusterResult};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};
use std::fmt;

/// Beacon chain slot number
pub type Slot = u64;

/// Beacon chain epoch number
pub type Epoch = u64;

/// 32-byte hash root
pub type Root = [u8; 32];

/// Length of a ClusterId in bytes
pub const CLUSTER_ID_LEN: usize = 48;

/// Length of a MessageId in bytes
pub const MESSAGE_ID_LEN: usize = 56;

/// Fixed prefix of every ClusterId: ASCII `cluster-id/v1` padded with zeros.
pub const CLUSTER_ID_PREFIX: [u8; 16] = *b"cluster-id/v1\0\0\0";

/// Identifier of a single operator, unique within a network.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OperatorId(pub u64);

impl OperatorId {
    /// Fixed-width encoding used when hashing operator sets.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OperatorId {
    fn from(id: u64) -> Self {
        OperatorId(id)
    }
}

/// Identifier of an operator set.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(#[serde_as(as = "Bytes")] pub [u8; CLUSTER_ID_LEN]);

impl ClusterId {
    pub fn as_bytes(&self) -> &[u8; CLUSTER_ID_LEN] {
        &self.0
    }
}

/// BLS public key of a validator.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorPubkey(#[serde_as(as = "Bytes")] pub [u8; 48]);

impl ValidatorPubkey {
    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }
}

/// Public key of one operator's share of a validator key.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharePubkey(#[serde_as(as = "Bytes")] pub [u8; 48]);

macro_rules! impl_hex_fmt {
    ($($ty:ty => $skip:expr),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    // Short form: 6 bytes is enough to tell keys apart in logs
                    write!(f, "0x{}…", hex::encode(&self.0[$skip..$skip + 6]))
                }
            }

            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}(0x{})", stringify!($ty), hex::encode(self.0))
                }
            }
        )*
    };
}

impl_hex_fmt!(ClusterId => CLUSTER_ID_PREFIX.len(), ValidatorPubkey => 0, SharePubkey => 0);

/// Derive the ClusterId of an operator set.
///
/// The result is independent of input order and duplicates. An empty
/// operator set does not define a cluster.
pub fn derive_cluster_id(operators: &[OperatorId]) -> ClusterResult<ClusterId> {
    if operators.is_empty() {
        return Err(ClusterError::InvalidInput(
            "cannot derive cluster id from an empty operator set".into(),
        ));
    }

    let mut sorted = operators.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for operator in &sorted {
        hasher.update(operator.to_bytes());
    }
    let digest = hasher.finalize();

    let mut id = [0u8; CLUSTER_ID_LEN];
    id[..16].copy_from_slice(&CLUSTER_ID_PREFIX);
    id[16..].copy_from_slice(&digest);
    Ok(ClusterId(id))
}

/// Network domain (4 raw bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Domain(pub [u8; 4]);

pub const MAINNET_DOMAIN: Domain = Domain([0, 0, 0, 1]);
pub const HOLESKY_DOMAIN: Domain = Domain([0, 0, 5, 2]);

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Duty role carried in a MessageId.
///
/// `Committee` addresses the cluster-level consensus instance; every other
/// role addresses a single validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Committee,
    Attester,
    Aggregator,
    Proposer,
    SyncCommittee,
    SyncCommitteeContribution,
    ValidatorRegistration,
    VoluntaryExit,
}

impl Role {
    pub fn code(self) -> u32 {
        match self {
            Role::Committee => 0,
            Role::Attester => 1,
            Role::Aggregator => 2,
            Role::Proposer => 3,
            Role::SyncCommittee => 4,
            Role::SyncCommitteeContribution => 5,
            Role::ValidatorRegistration => 6,
            Role::VoluntaryExit => 7,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let role = match code {
            0 => Role::Committee,
            1 => Role::Attester,
            2 => Role::Aggregator,
            3 => Role::Proposer,
            4 => Role::SyncCommittee,
            5 => Role::SyncCommitteeContribution,
            6 => Role::ValidatorRegistration,
            7 => Role::VoluntaryExit,
            _ => return None,
        };
        Some(role)
    }

    /// Whether the recipient field of a MessageId with this role is a ClusterId.
    pub fn addresses_cluster(self) -> bool {
        self == Role::Committee
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Recipient of a message: a whole cluster or a single validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recipient {
    Cluster(ClusterId),
    Validator(ValidatorPubkey),
}

impl Recipient {
    fn as_bytes(&self) -> &[u8; 48] {
        match self {
            Recipient::Cluster(id) => id.as_bytes(),
            Recipient::Validator(pk) => pk.as_bytes(),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Cluster(id) => write!(f, "cluster {}", id),
            Recipient::Validator(pk) => write!(f, "validator {}", pk),
        }
    }
}

/// Routing key embedded in every protocol message.
///
/// The role is kept next to the wire bytes so the recipient kind is known
/// without decoding again.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    bytes: [u8; MESSAGE_ID_LEN],
    role: Role,
}

impl MessageId {
    /// Build a MessageId.
    ///
    /// A `Committee` role must address a cluster and every other role a
    /// validator.
    pub fn new(domain: Domain, role: Role, recipient: Recipient) -> ClusterResult<Self> {
        let matches = matches!(
            (role.addresses_cluster(), &recipient),
            (true, Recipient::Cluster(_)) | (false, Recipient::Validator(_))
        );
        if !matches {
            return Err(ClusterError::InvalidInput(format!(
                "role {} cannot address {:?}",
                role, recipient
            )));
        }
        Ok(Self::assemble(domain, role, recipient.as_bytes()))
    }

    /// MessageId of a cluster's consensus instance.
    pub fn for_cluster(domain: Domain, cluster_id: ClusterId) -> Self {
        Self::assemble(domain, Role::Committee, cluster_id.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> ClusterResult<Self> {
        let (domain, role, recipient) = decode_message_id(bytes)?;
        Ok(Self::assemble(domain, role, recipient.as_bytes()))
    }

    fn assemble(domain: Domain, role: Role, recipient: &[u8; 48]) -> Self {
        let mut bytes = [0u8; MESSAGE_ID_LEN];
        bytes[0..4].copy_from_slice(&domain.0);
        bytes[4..8].copy_from_slice(&role.code().to_le_bytes());
        bytes[8..].copy_from_slice(recipient);
        MessageId { bytes, role }
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.bytes
    }

    pub fn domain(&self) -> Domain {
        let mut domain = [0u8; 4];
        domain.copy_from_slice(&self.bytes[0..4]);
        Domain(domain)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn recipient(&self) -> Recipient {
        let mut recipient = [0u8; 48];
        recipient.copy_from_slice(&self.bytes[8..]);
        if self.role.addresses_cluster() {
            Recipient::Cluster(ClusterId(recipient))
        } else {
            Recipient::Validator(ValidatorPubkey(recipient))
        }
    }

    pub fn parts(&self) -> (Domain, Role, Recipient) {
        (self.domain(), self.role, self.recipient())
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId(0x{})", hex::encode(self.bytes))
    }
}

/// Encode a MessageId to its 56-byte wire form.
pub fn encode_message_id(
    domain: Domain,
    role: Role,
    recipient: Recipient,
) -> ClusterResult<[u8; MESSAGE_ID_LEN]> {
    Ok(*MessageId::new(domain, role, recipient)?.as_bytes())
}

/// Decode a 56-byte MessageId.
pub fn decode_message_id(bytes: &[u8]) -> ClusterResult<(Domain, Role, Recipient)> {
    if bytes.len() != MESSAGE_ID_LEN {
        return Err(ClusterError::MalformedMessageId(format!(
            "expected {} bytes, got {}",
            MESSAGE_ID_LEN,
            bytes.len()
        )));
    }

    let mut domain = [0u8; 4];
    domain.copy_from_slice(&bytes[0..4]);

    let mut role_bytes = [0u8; 4];
    role_bytes.copy_from_slice(&bytes[4..8]);
    let code = u32::from_le_bytes(role_bytes);
    let role = Role::from_code(code)
        .ok_or_else(|| ClusterError::MalformedMessageId(format!("unknown role code {}", code)))?;

    let mut recipient = [0u8; 48];
    recipient.copy_from_slice(&bytes[8..]);
    let recipient = if role.addresses_cluster() {
        Recipient::Cluster(ClusterId(recipient))
    } else {
        Recipient::Validator(ValidatorPubkey(recipient))
    };

    Ok((Domain(domain), role, recipient))
}
