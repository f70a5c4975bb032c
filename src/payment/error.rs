//! Error taxonomy of the payment flow.
//!
//! None of these are fatal: every variant leaves the flow able to retry or
//! be dismissed. Stale events are not errors at all; they are dropped by the
//! session and only counted.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::gateway::GatewayError;

/// Which gateway operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Quote,
    Cancel,
    PendingLookup,
}

impl Operation {
    /// Generic message shown when the gateway gives no reason.
    pub fn fallback_message(&self) -> &'static str {
        match self {
            Operation::Quote => "Failed to generate QR code",
            Operation::Cancel => "Failed to cancel transaction",
            Operation::PendingLookup => "Failed to load pending transaction",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Quote => "quote",
            Operation::Cancel => "cancel",
            Operation::PendingLookup => "pending_lookup",
        }
    }
}

/// Errors surfaced to whoever renders the payment flow.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PaymentError {
    /// Amount missing, zero or negative.
    #[error("Please select an amount")]
    InvalidAmount,

    /// A reference id was empty.
    #[error("Transaction reference must not be empty")]
    EmptyReference,

    /// The gateway could not be reached.
    #[error("{}", .operation.fallback_message())]
    NetworkFailure { operation: Operation, detail: String },

    /// The gateway answered with a non-success status.
    #[error("{}", rejection_message(.operation, .reason))]
    GatewayRejection {
        operation: Operation,
        status: Option<u16>,
        reason: Option<String>,
    },

    /// The transaction expired before payment arrived.
    #[error("Transaction expired")]
    Expired,

    /// The real-time channel failed. The QR flow keeps going.
    #[error("Failed to connect to server")]
    ChannelError { detail: String },
}

fn rejection_message<'a>(operation: &Operation, reason: &'a Option<String>) -> &'a str {
    reason.as_deref().unwrap_or(operation.fallback_message())
}

impl PaymentError {
    /// Classify a gateway failure for the given operation.
    pub fn from_gateway(operation: Operation, err: &GatewayError) -> Self {
        match err {
            GatewayError::Network(detail) | GatewayError::Timeout(detail) => {
                PaymentError::NetworkFailure {
                    operation,
                    detail: detail.clone(),
                }
            }
            GatewayError::Rejected { status, reason } => PaymentError::GatewayRejection {
                operation,
                status: Some(*status),
                reason: reason.clone(),
            },
            GatewayError::InvalidResponse(_) | GatewayError::InvalidUrl(_) => {
                PaymentError::GatewayRejection {
                    operation,
                    status: None,
                    reason: None,
                }
            }
        }
    }

    pub fn from_channel(err: &ChannelError) -> Self {
        PaymentError::ChannelError {
            detail: err.to_string(),
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::InvalidAmount => "invalid_amount",
            PaymentError::EmptyReference => "empty_reference",
            PaymentError::NetworkFailure { .. } => "network",
            PaymentError::GatewayRejection { .. } => "rejected",
            PaymentError::Expired => "expired",
            PaymentError::ChannelError { .. } => "channel",
        }
    }
}
