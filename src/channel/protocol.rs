//! Channel wire format.
//!
//! Every message is a JSON text frame `{"event": <name>, "data": <payload>}`.
//! The client sends `subscribe_event` with the reference id as data; the
//! server answers with `status_event` carrying a `TopupStatusEvent`.
//!
//! This is plain WebSocket framing, not socket.io: engine.io packet prefixes
//! such as `42[...]` are rejected as malformed.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelError;
use crate::config::ChannelConfig;
use crate::payment::types::{RefId, TopupStatusEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Event names in use on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNames {
    pub subscribe: String,
    pub status: String,
}

impl EventNames {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            subscribe: config.subscribe_event.clone(),
            status: config.status_event.clone(),
        }
    }
}

impl Default for EventNames {
    fn default() -> Self {
        Self::from_config(&ChannelConfig::default())
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Subscribe(RefId),
    Status(TopupStatusEvent),
    /// Some other event; ignored by both sides.
    Other(String),
}

pub fn encode_subscribe(names: &EventNames, reference: &RefId) -> String {
    encode(&names.subscribe, serde_json::Value::String(reference.to_string()))
}

pub fn encode_status(names: &EventNames, event: &TopupStatusEvent) -> String {
    let data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    encode(&names.status, data)
}

fn encode(event: &str, data: serde_json::Value) -> String {
    let envelope = Envelope {
        event: event.to_string(),
        data,
    };
    // Serializing a String key and a Value cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Decode a text frame.
pub fn decode(names: &EventNames, text: &str) -> Result<Inbound, ChannelError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ChannelError::Protocol(e.to_string()))?;

    if envelope.event == names.status {
        let event: TopupStatusEvent = serde_json::from_value(envelope.data)
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        Ok(Inbound::Status(event))
    } else if envelope.event == names.subscribe {
        let reference: RefId = serde_json::from_value(envelope.data)
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        Ok(Inbound::Subscribe(reference))
    } else {
        Ok(Inbound::Other(envelope.event))
    }
}
