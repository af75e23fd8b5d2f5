//! Events layer
//!
//! - consumed: wire messages received from (and broadcast to) peers
//! - published: outcomes handed back to the scheduler and transport

mod consumed;
mod published;

pub use consumed::*;
pub use published::*;
