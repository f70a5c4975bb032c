//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the payment
//! client. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the payment client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway REST endpoint settings.
    pub gateway: GatewayConfig,

    /// Real-time status channel settings.
    pub channel: ChannelConfig,

    /// Countdown window and tick rate.
    pub countdown: CountdownConfig,

    /// Presentation details shown next to the QR code.
    pub display: DisplayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Local sandbox gateway.
    pub sandbox: SandboxConfig,
}

/// Gateway REST configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the payment gateway (e.g., "https://gw.example.com").
    pub base_url: String,

    /// Total time allowed for a single gateway request, in seconds.
    pub request_timeout_secs: u64,

    /// Prefix joined to the user id when identifying a user to the gateway.
    pub user_id_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://payment-gw.expert8apisolutions.com".to_string(),
            request_timeout_secs: 15,
            user_id_prefix: "saas".to_string(),
        }
    }
}

/// Real-time channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket URL of the status channel. The endpoint must speak the
    /// plain JSON envelope framing of `channel::protocol` (the bundled
    /// sandbox gateway does); socket.io endpoints are not supported.
    pub url: String,

    /// Event name the client emits to subscribe to a reference.
    pub subscribe_event: String,

    /// Event name the server uses for status pushes.
    pub status_event: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Reconnect after an unexpected disconnect.
    pub reconnect: bool,

    /// Maximum consecutive reconnect attempts before giving up.
    pub reconnect_max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "wss://payment-gw.expert8apisolutions.com/ws".to_string(),
            subscribe_event: "subscribe-topup".to_string(),
            status_event: "topup-status-update".to_string(),
            connect_timeout_secs: 10,
            reconnect: true,
            reconnect_max_attempts: 5,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 10_000,
        }
    }
}

/// Countdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Seconds between `createdAt` and the gateway-side expiry.
    pub window_secs: u64,

    /// Interval between countdown refreshes in milliseconds.
    pub tick_interval_ms: u64,

    /// Treat a countdown that reaches zero as a local expiry.
    pub expire_locally: bool,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60 + 55,
            tick_interval_ms: 1000,
            expire_locally: true,
        }
    }
}

/// Display configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Currency label printed after the amount.
    pub currency: String,

    /// PromptPay number offered as an alternative to scanning.
    pub promptpay_number: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            currency: "THB".to_string(),
            promptpay_number: Some("081-234-5678".to_string()),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Sandbox gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Bind address (e.g., "127.0.0.1:8090").
    pub bind_address: String,

    /// Seconds after which a pending sandbox transaction expires.
    pub expire_after_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            expire_after_secs: 15 * 60 + 55,
        }
    }
}
