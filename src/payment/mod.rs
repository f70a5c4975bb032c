//! Payment flow subsystem.
//!
//! # Data Flow
//! ```text
//! caller (CLI, embedding app)
//!     → coordinator.rs (PaymentHandle: set_amount / cancel / dispose)
//!         → gateway::Gateway (quote, cancel, pending lookup)
//!         → channel::Subscription (status pushes)
//!         → countdown.rs (ticks)
//!     → session.rs (phase transitions, active reference)
//!     → PaymentView (watch) + PaymentNotice (mpsc) back to the caller
//! ```
//!
//! # Design Decisions
//! - `session.rs` is pure and synchronous; all I/O lives in the coordinator
//! - The active reference is the only guard against stale pushes
//! - Errors are a banner over the current phase, never a phase of their own

pub mod coordinator;
pub mod countdown;
pub mod error;
pub mod session;
pub mod types;

pub use coordinator::{
    FeedbackLevel, PaymentCoordinator, PaymentHandle, PaymentNotice, PaymentView, SessionClosed,
    Start,
};
pub use countdown::{format_remaining, Clock, Countdown, ManualClock, SystemClock};
pub use error::{Operation, PaymentError};
pub use session::{PaymentPhase, PaymentSession, Transition};
pub use types::{
    Amount, CurrentUser, PaymentRequest, RefId, TopupStatus, TopupStatusEvent, UserRole,
};
