//! Configuration validation.
//!
//! Serde handles the syntactic checks; this module checks value ranges and
//! URL schemes. Every failure is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "gateway.base_url").
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_url(
        &mut errors,
        "gateway.base_url",
        &config.gateway.base_url,
        &["http", "https"],
    );
    if config.gateway.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "gateway.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.gateway.user_id_prefix.is_empty() {
        errors.push(ValidationError::new("gateway.user_id_prefix", "must not be empty"));
    }

    let channel = &config.channel;
    check_url(&mut errors, "channel.url", &channel.url, &["ws", "wss"]);
    if channel.subscribe_event.is_empty() {
        errors.push(ValidationError::new("channel.subscribe_event", "must not be empty"));
    }
    if channel.status_event.is_empty() {
        errors.push(ValidationError::new("channel.status_event", "must not be empty"));
    }
    if channel.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "channel.connect_timeout_secs",
            "must be greater than zero",
        ));
    }
    if channel.reconnect_base_delay_ms > channel.reconnect_max_delay_ms {
        errors.push(ValidationError::new(
            "channel.reconnect_base_delay_ms",
            "must not exceed reconnect_max_delay_ms",
        ));
    }

    if config.countdown.window_secs == 0 {
        errors.push(ValidationError::new("countdown.window_secs", "must be greater than zero"));
    }
    if config.countdown.tick_interval_ms == 0 {
        errors.push(ValidationError::new(
            "countdown.tick_interval_ms",
            "must be greater than zero",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.sandbox.expire_after_secs == 0 {
        errors.push(ValidationError::new(
            "sandbox.expire_after_secs",
            "must be greater than zero",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, raw: &str, schemes: &[&str]) {
    match Url::parse(raw) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}' (expected {})", url.scheme(), schemes.join(" or ")),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", raw, e))),
    }
}
