//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     Ctrl-C / SIGTERM → Shutdown::trigger()
//!
//! Shutdown (shutdown.rs):
//!     trigger() → every subscriber (payment flow, sandbox server) winds down
//! ```
//!
//! # Design Decisions
//! - One broadcast for everything long-running
//! - A payment flow that sees shutdown disposes its channel before exiting

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
