//! REST client for the payment gateway.
//!
//! # Responsibilities
//! - Request QR quotes (`GET /topup`)
//! - Cancel pending transactions (`DELETE /topup/{refId}`)
//! - Look up a user's pending transaction (`POST /topup/current`)
//! - Map transport failures and non-2xx answers to `GatewayError`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::config::GatewayConfig;
use crate::gateway::types::{
    CurrentTopupRequest, ErrorBody, GatewayError, GatewayResult, TopupResponse,
};
use crate::gateway::Gateway;
use crate::observability::metrics;
use crate::payment::types::{Amount, CurrentUser, PaymentRequest, RefId};

/// reqwest-backed gateway client.
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: Url,
    user_id_prefix: String,
}

impl GatewayClient {
    /// Create a new gateway client.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let base_url: Url = config.base_url.parse().map_err(|e| {
            GatewayError::InvalidUrl(format!("'{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(config.base_url.clone()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        tracing::debug!(base_url = %base_url, "Gateway client initialized");

        Ok(Self {
            http,
            base_url,
            user_id_prefix: config.user_id_prefix.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn request_quote(
        &self,
        amount: Amount,
        user: Option<&CurrentUser>,
    ) -> GatewayResult<PaymentRequest> {
        let start = Instant::now();
        let url = self.endpoint(&["topup"])?;

        let mut query = vec![("amount", amount.to_string())];
        if let Some(user) = user {
            query.push(("userId", user.gateway_user_id(&self.user_id_prefix)));
        }

        tracing::debug!(amount = %amount, "Requesting QR quote");
        let result = async {
            let response = self.http.get(url).query(&query).send().await?;
            let body: TopupResponse = ensure_success(response).await?.json().await?;
            PaymentRequest::try_from(body)
        }
        .await;

        metrics::record_gateway_request("quote", result.is_ok(), start);
        result
    }

    async fn cancel(&self, reference: &RefId) -> GatewayResult<()> {
        let start = Instant::now();
        let url = self.endpoint(&["topup", reference.as_str()])?;

        tracing::debug!(ref_id = %reference, "Cancelling transaction");
        let result = async {
            let response = self.http.delete(url).send().await?;
            ensure_success(response).await?;
            Ok::<(), GatewayError>(())
        }
        .await;

        metrics::record_gateway_request("cancel", result.is_ok(), start);
        result
    }

    async fn current_transaction(
        &self,
        user: &CurrentUser,
    ) -> GatewayResult<Option<PaymentRequest>> {
        let start = Instant::now();
        let url = self.endpoint(&["topup", "current"])?;
        let body = CurrentTopupRequest {
            user_id: user.gateway_user_id(&self.user_id_prefix),
        };

        let result = async {
            let response = self.http.post(url).json(&body).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body: TopupResponse = ensure_success(response).await?.json().await?;
            PaymentRequest::try_from(body).map(Some)
        }
        .await;

        metrics::record_gateway_request("current", result.is_ok(), start);
        result
    }
}

/// Pass 2xx responses through; turn anything else into `Rejected`, keeping
/// the gateway's `error` text when the body has one.
async fn ensure_success(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.error)
        .filter(|error| !error.is_empty());

    tracing::warn!(status = %status, reason = ?reason, "Gateway returned error status");
    Err(GatewayError::Rejected {
        status: status.as_u16(),
        reason,
    })
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url.as_str())
            .field("user_id_prefix", &self.user_id_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> GatewayClient {
        let config = GatewayConfig {
            base_url: base_url.to_string(),
            request_timeout_secs: 1,
            user_id_prefix: "saas".to_string(),
        };
        GatewayClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_building() {
        let c = client("http://gw.local");
        assert_eq!(c.endpoint(&["topup"]).unwrap().as_str(), "http://gw.local/topup");

        let c = client("http://gw.local/api/");
        assert_eq!(
            c.endpoint(&["topup", "current"]).unwrap().as_str(),
            "http://gw.local/api/topup/current"
        );
    }

    #[test]
    fn test_reference_is_escaped() {
        let c = client("http://gw.local");
        let url = c.endpoint(&["topup", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://gw.local/topup/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = GatewayConfig {
            base_url: "mailto:someone@example.com".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(GatewayClient::new(&config), Err(GatewayError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_network_error() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let c = client("http://127.0.0.1:9");
        let result = c.cancel(&RefId::new("R1").unwrap()).await;
        assert!(matches!(
            result,
            Err(GatewayError::Network(_)) | Err(GatewayError::Timeout(_))
        ));
    }
}
