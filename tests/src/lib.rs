//! # Cluster Consensus Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Identifier codec benchmarks
//! └── src/integration/  # Several operators, each with its own node, exchanging messages
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p qc-tests
//! RUST_LOG=debug cargo test -p qc-tests integration:: -- --nocapture
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(dead_code)]

pub mod integration;
