//! Cross-operator integration flows

pub mod cluster_flows;
pub mod harness;
