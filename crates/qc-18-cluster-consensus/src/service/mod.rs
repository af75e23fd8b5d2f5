//! Cluster Service - Core business logic
//!
//! # Architecture
//! - One `Cluster` per operator set, owning its runners
//! - `ClusterRouter` implements the inbound ports for the whole node

mod cluster;
mod router;

pub use cluster::*;
pub use router::*;
