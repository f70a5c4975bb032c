//! Local sandbox gateway.
//!
//! # Data Flow
//! ```text
//! GET /topup, DELETE /topup/{refId}, POST /topup/current
//!     → server.rs handlers
//!     → state.rs (pending transactions in memory)
//!
//! POST /sandbox/topup/{refId}/complete | /expire, or the expiry timer
//!     → state.rs removes the transaction
//!     → broadcast of TopupStatusEvent
//!     → every /ws connection subscribed to that refId
//! ```
//!
//! # Design Decisions
//! - Speaks the same REST and channel contract as the real gateway
//! - No persistence; a restart forgets every transaction
//! - Stops on the shared `Shutdown` broadcast, WebSocket connections included

pub mod server;
pub mod state;

pub use server::SandboxServer;
pub use state::SandboxState;
