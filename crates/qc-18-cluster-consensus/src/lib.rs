//! # qc-18-cluster-consensus
//!
//! Cluster duty aggregation for distributed validators.
//!
//! ## Architecture
//!
//! A cluster is a fixed set of operators jointly managing many validators.
//! Instead of one agreement instance per validator duty, a cluster runs one
//! instance per slot and agrees on duty-agnostic data. Each validator then
//! derives its own signing payload from the shared decision.
//!
//! ```text
//! scheduler ──start_duties──→ [ClusterRouter] ──→ Cluster ──→ ConsensusRunner ──→ engine
//!                                                    │                              │
//!                                                    │←──────── decided ────────────┘
//!                                                    ↓
//!                              ┌─────────────────────┼─────────────────────┐
//!                              ↓                     ↓                     ↓
//!                     [PartialSigRunner V1] [PartialSigRunner V2] [PartialSigRunner V3]
//!                              │                     │                     │
//!                              └──── partial signatures, quorum, reconstruct ──┘
//! ```
//!
//! ### Routing
//!
//! Every network message carries a 56-byte MessageId
//! (`domain ‖ role ‖ recipient`). Consensus traffic is addressed to a
//! ClusterId with the `Committee` role; partial signatures are addressed to
//! a validator public key with the duty role.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qc_18_cluster_consensus::{ClusterConfig, ClusterDependencies, ClusterRouter, OperatorId};
//! use qc_18_cluster_consensus::ports::{DutyApi, MessageHandler};
//!
//! let router = ClusterRouter::new(OperatorId(1), ClusterConfig::default(), deps);
//! router.register_validator(share)?;
//!
//! // Scheduler tick
//! let outcomes = router.start_duties(duties, slot).await?;
//!
//! // Transport delivery
//! let outcome = router.handle_message(msg).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod runner;
pub mod service;

// Re-export main types
pub use adapters::{CommitQuorumEngine, HashShareSigner, InMemoryNetwork, StaticBeaconNode};
pub use domain::{
    derive_cluster_id, ClusterConfig, ClusterError, ClusterId, ClusterResult, ConsensusData, Duty,
    MessageId, OperatorId, Role, ValidatorPubkey, ValidatorShare,
};
pub use ports::{AgreementEngine, BeaconNode, DutyApi, MessageHandler, Network, ShareSigner, SignatureVerifier};
pub use runner::{ConsensusRunner, PartialSigRunner};
pub use service::{Cluster, ClusterDependencies, ClusterRouter};
