//! Domain layer for the cluster consensus subsystem
//!
//! - identifiers: ClusterId derivation and the MessageId codec
//! - consensus_data: the validator-independent value agreed per slot
//! - duty: duties, role handling split, validator shares
//! - instance: consensus instance state machine
//! - partial_sig: signing payloads and per-slot signature collection
//! - admission: per-epoch duty start limits

mod admission;
mod config;
mod consensus_data;
mod duty;
mod error;
mod identifiers;
mod instance;
mod partial_sig;

pub use admission::*;
pub use config::*;
pub use consensus_data::*;
pub use duty::*;
pub use error::*;
pub use identifiers::*;
pub use instance::*;
pub use partial_sig::*;
