//! Daemon lifecycle: graceful shutdown on process signals

mod shutdown;

pub use shutdown::{ShutdownReason, ShutdownSignal};
