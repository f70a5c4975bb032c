//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Status channel drops:
//!     → websocket.rs notices the lost connection
//!     → backoff.rs (exponential delay with jitter per attempt)
//!     → reconnect, re-subscribe, or give up after the attempt limit
//! ```
//!
//! # Design Decisions
//! - Gateway calls are never retried automatically; the user retries
//! - Only the status channel reconnects on its own
//! - Delays are capped so a long outage does not stall the countdown view

pub mod backoff;
