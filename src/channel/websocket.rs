//! WebSocket channel transport.
//!
//! # Responsibilities
//! - Connect to the gateway's status socket with a timeout
//! - Forward `Subscribe` commands as subscribe frames
//! - Decode status frames into `ChannelNotice::Status`
//! - Reconnect with backoff after an unexpected disconnect and re-send the
//!   last subscription
//!
//! # Data Flow
//! ```text
//! Subscription ──commands──▶ connection task ──text frames──▶ gateway
//! Subscription ◀──notices─── connection task ◀──text frames── gateway
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::protocol::{self, EventNames, Inbound};
use crate::channel::{Channel, ChannelCommand, ChannelError, ChannelNotice, Subscription};
use crate::config::ChannelConfig;
use crate::observability::metrics;
use crate::payment::types::RefId;
use crate::resilience::backoff::calculate_backoff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Status channel over a WebSocket connection.
#[derive(Debug, Clone)]
pub struct WebSocketChannel {
    config: ChannelConfig,
}

impl WebSocketChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn open(&self) -> Result<Subscription, ChannelError> {
        let stream = connect(&self.config).await?;
        tracing::info!(url = %self.config.url, "Status channel connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let _ = notice_tx.send(ChannelNotice::Connected);

        let task = tokio::spawn(run_connection(
            self.config.clone(),
            stream,
            cmd_rx,
            notice_tx,
        ));

        Ok(Subscription::new(cmd_tx, notice_rx, Some(task)))
    }
}

async fn connect(config: &ChannelConfig) -> Result<WsStream, ChannelError> {
    let deadline = Duration::from_secs(config.connect_timeout_secs);
    match timeout(deadline, connect_async(config.url.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => {
            metrics::record_channel_error("connect");
            Err(ChannelError::Connect(e.to_string()))
        }
        Err(_) => {
            metrics::record_channel_error("timeout");
            Err(ChannelError::Timeout(config.connect_timeout_secs))
        }
    }
}

/// Why a connection stopped being driven.
enum Drive {
    /// The subscriber asked to close (or went away).
    Closed,
    /// The connection dropped underneath us.
    Lost(String),
}

enum Reconnect {
    Connected(WsStream),
    Closed,
    GaveUp,
}

async fn run_connection(
    config: ChannelConfig,
    mut stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
) {
    let names = EventNames::from_config(&config);
    let mut current: Option<RefId> = None;

    loop {
        let reason = match drive(&names, &mut stream, &mut commands, &notices, &mut current).await {
            Drive::Closed => {
                let _ = stream.close(None).await;
                tracing::debug!("Status channel closed");
                return;
            }
            Drive::Lost(reason) => reason,
        };

        tracing::warn!(reason = %reason, "Status channel disconnected");
        metrics::record_channel_error("disconnect");
        if notices.send(ChannelNotice::Disconnected).is_err() {
            return;
        }

        if !config.reconnect {
            let _ = notices.send(ChannelNotice::Error(ChannelError::Disconnected(reason)));
            return;
        }

        match reconnect(&config, &mut commands, &mut current).await {
            Reconnect::Connected(new_stream) => {
                stream = new_stream;
                if let Some(reference) = &current {
                    let frame = protocol::encode_subscribe(&names, reference);
                    if let Err(e) = stream.send(Message::Text(frame.into())).await {
                        tracing::warn!(error = %e, "Failed to re-send subscription");
                    }
                }
                tracing::info!(ref_id = ?current, "Status channel reconnected");
                let _ = notices.send(ChannelNotice::Connected);
            }
            Reconnect::Closed => return,
            Reconnect::GaveUp => {
                tracing::error!(
                    attempts = config.reconnect_max_attempts,
                    "Giving up on status channel"
                );
                let _ = notices.send(ChannelNotice::Error(ChannelError::Disconnected(reason)));
                return;
            }
        }
    }
}

async fn drive(
    names: &EventNames,
    stream: &mut WsStream,
    commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    notices: &mpsc::UnboundedSender<ChannelNotice>,
    current: &mut Option<RefId>,
) -> Drive {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ChannelCommand::Subscribe(reference)) => {
                    let frame = protocol::encode_subscribe(names, &reference);
                    *current = Some(reference);
                    if let Err(e) = stream.send(Message::Text(frame.into())).await {
                        return Drive::Lost(e.to_string());
                    }
                }
                Some(ChannelCommand::Close) | None => return Drive::Closed,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match protocol::decode(names, text.as_str()) {
                    Ok(Inbound::Status(event)) => {
                        tracing::debug!(ref_id = %event.ref_id, status = event.status.as_str(), "Status frame received");
                        let _ = notices.send(ChannelNotice::Status(event));
                    }
                    Ok(Inbound::Subscribe(_)) | Ok(Inbound::Other(_)) => {}
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed channel frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Drive::Lost(format!("closed by server: {:?}", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Drive::Lost(e.to_string()),
                None => return Drive::Lost("stream ended".to_string()),
            },
        }
    }
}

async fn reconnect(
    config: &ChannelConfig,
    commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    current: &mut Option<RefId>,
) -> Reconnect {
    for attempt in 1..=config.reconnect_max_attempts {
        let delay = calculate_backoff(
            attempt,
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
        );
        tracing::info!(attempt, delay = ?delay, "Reconnecting status channel");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(ChannelCommand::Subscribe(reference)) => *current = Some(reference),
                    Some(ChannelCommand::Close) | None => return Reconnect::Closed,
                },
            }
        }

        match connect(config).await {
            Ok(stream) => return Reconnect::Connected(stream),
            Err(e) => tracing::warn!(attempt, error = %e, "Reconnect attempt failed"),
        }
    }
    Reconnect::GaveUp
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config(url: String) -> ChannelConfig {
        ChannelConfig {
            url,
            connect_timeout_secs: 2,
            reconnect_max_attempts: 3,
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 50,
            ..ChannelConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = WebSocketChannel::new(config(format!("ws://{}", addr)));
        let err = channel.open().await.unwrap_err();
        assert!(matches!(err, ChannelError::Connect(_)));
    }

    #[tokio::test]
    async fn test_resubscribes_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let names = EventNames::default();

        let server = tokio::spawn(async move {
            // First connection: read the subscription, then drop the socket.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            drop(ws);

            // Second connection: the client re-sends the same subscription.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let second = ws.next().await.unwrap().unwrap();
            (first.into_text().unwrap().to_string(), second.into_text().unwrap().to_string())
        });

        let channel = WebSocketChannel::new(config(format!("ws://{}", addr)));
        let mut sub = channel.open().await.unwrap();
        assert_eq!(sub.next_notice().await, Some(ChannelNotice::Connected));

        let r1 = RefId::new("R1").unwrap();
        sub.subscribe(&r1).unwrap();

        assert_eq!(sub.next_notice().await, Some(ChannelNotice::Disconnected));
        assert_eq!(sub.next_notice().await, Some(ChannelNotice::Connected));

        let (first, second) = server.await.unwrap();
        let expected = protocol::encode_subscribe(&names, &r1);
        assert_eq!(first, expected);
        assert_eq!(second, expected);

        sub.dispose();
    }
}
