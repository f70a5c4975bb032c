//! Gateway wire types and error definitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payment::types::{Amount, PaymentRequest, RefId};

/// Success body of `GET /topup` and `POST /topup/current`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupResponse {
    pub qr_code: String,
    pub ref_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl TryFrom<TopupResponse> for PaymentRequest {
    type Error = GatewayError;

    fn try_from(body: TopupResponse) -> Result<Self, Self::Error> {
        let reference_id = RefId::new(body.ref_id)
            .map_err(|_| GatewayError::InvalidResponse("empty refId".to_string()))?;
        let amount = Amount::new(body.amount).map_err(|_| {
            GatewayError::InvalidResponse(format!("non-positive amount {}", body.amount))
        })?;
        Ok(PaymentRequest {
            amount,
            reference_id,
            qr_image_data: body.qr_code,
            created_at: body.created_at,
        })
    }
}

impl From<&PaymentRequest> for TopupResponse {
    fn from(request: &PaymentRequest) -> Self {
        Self {
            qr_code: request.qr_image_data.clone(),
            ref_id: request.reference_id.to_string(),
            created_at: request.created_at,
            amount: request.amount.value(),
        }
    }
}

/// Body of `POST /topup/current`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTopupRequest {
    pub user_id: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors that can occur talking to the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Connection failed or the request could not be sent.
    #[error("Gateway unreachable: {0}")]
    Network(String),

    /// Request did not finish within the configured timeout.
    #[error("Gateway request timed out: {0}")]
    Timeout(String),

    /// Gateway answered with a non-success status.
    #[error("Gateway rejected request with status {status}{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Rejected { status: u16, reason: Option<String> },

    /// Success status but the body did not match the contract.
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// The configured base URL cannot address the endpoint.
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
