//! Runners
//!
//! `ConsensusRunner` drives the one agreement instance of a cluster;
//! `PartialSigRunner` signs and aggregates per validator once it decides.

mod consensus;
mod partial_sig;

pub use consensus::*;
pub use partial_sig::*;
