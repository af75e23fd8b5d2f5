//! # Cluster Consensus Metrics
//!
//! Prometheus metrics for monitoring cluster consensus and signing.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-18-cluster-consensus = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `cluster_decisions_total` - Counter of decided consensus instances
//! - `cluster_messages_dropped_total` - Counter of dropped messages (by reason)
//! - `cluster_partial_signatures_total` - Counter of accepted partial signatures
//! - `cluster_duties_finalized_total` - Counter of reconstructed validator signatures
//! - `cluster_duty_starts_rejected_total` - Counter of rejected duty starts (by reason)

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total consensus instances decided
    pub static ref DECISIONS: IntCounter = register_int_counter!(
        "cluster_decisions_total",
        "Total number of decided cluster consensus instances"
    )
    .expect("Failed to create DECISIONS metric");

    /// Total inbound messages dropped, labeled by reason
    pub static ref MESSAGES_DROPPED: CounterVec = register_counter_vec!(
        "cluster_messages_dropped_total",
        "Total number of inbound messages dropped",
        &["reason"]
    )
    .expect("Failed to create MESSAGES_DROPPED metric");

    /// Total partial signatures accepted
    pub static ref PARTIAL_SIGNATURES: IntCounter = register_int_counter!(
        "cluster_partial_signatures_total",
        "Total number of partial signatures accepted"
    )
    .expect("Failed to create PARTIAL_SIGNATURES metric");

    /// Total validator signatures reconstructed
    pub static ref DUTIES_FINALIZED: IntCounter = register_int_counter!(
        "cluster_duties_finalized_total",
        "Total number of reconstructed validator signatures"
    )
    .expect("Failed to create DUTIES_FINALIZED metric");

    /// Total duty starts rejected, labeled by reason
    pub static ref DUTY_STARTS_REJECTED: CounterVec = register_counter_vec!(
        "cluster_duty_starts_rejected_total",
        "Total number of rejected duty starts",
        &["reason"]
    )
    .expect("Failed to create DUTY_STARTS_REJECTED metric");
}

/// Record a decided consensus instance
#[cfg(feature = "metrics")]
pub fn record_decision() {
    DECISIONS.inc();
}

/// Record a dropped inbound message with reason
#[cfg(feature = "metrics")]
pub fn record_message_dropped(reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[reason]).inc();
}

/// Record an accepted partial signature
#[cfg(feature = "metrics")]
pub fn record_partial_signature() {
    PARTIAL_SIGNATURES.inc();
}

/// Record a reconstructed validator signature
#[cfg(feature = "metrics")]
pub fn record_duty_finalized() {
    DUTIES_FINALIZED.inc();
}

/// Record a rejected duty start with reason
#[cfg(feature = "metrics")]
pub fn record_duty_start_rejected(reason: &str) {
    DUTY_STARTS_REJECTED.with_label_values(&[reason]).inc();
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_decision() {}

#[cfg(not(feature = "metrics"))]
pub fn record_message_dropped(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_partial_signature() {}

#[cfg(not(feature = "metrics"))]
pub fn record_duty_finalized() {}

#[cfg(not(feature = "metrics"))]
pub fn record_duty_start_rejected(_reason: &str) {}
