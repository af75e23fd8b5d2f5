//! Adapters layer (Hexagonal Architecture)
//!
//! In-process implementations of the outbound ports. They back the test
//! suites and single-process simulations; production wiring supplies its own.

mod commit_quorum_engine;
mod hash_signer;
mod in_memory_network;
mod static_beacon;

pub use commit_quorum_engine::*;
pub use hash_signer::*;
pub use in_memory_network::*;
pub use static_beacon::*;
