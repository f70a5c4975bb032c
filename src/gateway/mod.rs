//! Payment gateway integration subsystem.
//!
//! # Data Flow
//! ```text
//! PaymentCoordinator
//!     → Gateway trait (quote, cancel, pending lookup)
//!     → client.rs (reqwest, timeouts, status mapping)
//!     → types.rs (wire bodies ↔ PaymentRequest)
//! ```
//!
//! # Design Decisions
//! - The coordinator only sees the `Gateway` trait so tests can swap in
//!   scripted gateways
//! - Non-2xx answers keep the gateway's own `error` text
//! - No retries here; a failed call is reported and the caller decides

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::payment::types::{Amount, CurrentUser, PaymentRequest, RefId};

pub use client::GatewayClient;
pub use types::{GatewayError, GatewayResult, TopupResponse};

/// Operations the payment flow needs from a gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Issue a QR payment token for `amount`.
    async fn request_quote(
        &self,
        amount: Amount,
        user: Option<&CurrentUser>,
    ) -> GatewayResult<PaymentRequest>;

    /// Cancel a pending transaction.
    async fn cancel(&self, reference: &RefId) -> GatewayResult<()>;

    /// Pending transaction for `user`, if any.
    async fn current_transaction(
        &self,
        user: &CurrentUser,
    ) -> GatewayResult<Option<PaymentRequest>>;
}
