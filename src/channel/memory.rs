//! In-process channel transport.
//!
//! Every `open()` produces a `MemoryPeer` that plays the server side: it
//! sees the subscriber's commands and can push notices back. Peers wait in a
//! bounded queue until `accept()` takes them; once `MAX_PENDING_PEERS` are
//! waiting, `open()` is refused.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::channel::{Channel, ChannelCommand, ChannelError, ChannelNotice, Subscription};
use crate::payment::types::{RefId, TopupStatus, TopupStatusEvent};

/// Connections that may wait for `accept()` at once.
pub const MAX_PENDING_PEERS: usize = 16;

/// Channel whose connections live in the same process.
#[derive(Clone)]
pub struct MemoryChannel {
    peers_tx: mpsc::Sender<MemoryPeer>,
    peers_rx: Arc<AsyncMutex<mpsc::Receiver<MemoryPeer>>>,
    fail_next: Arc<Mutex<Option<ChannelError>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::channel(MAX_PENDING_PEERS);
        Self {
            peers_tx,
            peers_rx: Arc::new(AsyncMutex::new(peers_rx)),
            fail_next: Arc::new(Mutex::new(None)),
        }
    }

    /// Make the next `open()` fail with `error`.
    pub fn fail_next_open(&self, error: ChannelError) {
        *self.fail_next() = Some(error);
    }

    fn fail_next(&self) -> MutexGuard<'_, Option<ChannelError>> {
        self.fail_next.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the next connection opened on this channel.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.peers_rx.lock().await.recv().await
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn open(&self) -> Result<Subscription, ChannelError> {
        if let Some(error) = self.fail_next().take() {
            return Err(error);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let _ = notice_tx.send(ChannelNotice::Connected);

        self.peers_tx
            .try_send(MemoryPeer {
                commands: cmd_rx,
                notices: notice_tx,
                subscribed: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ChannelError::Connect("no peer accepting connections".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            })?;

        Ok(Subscription::new(cmd_tx, notice_rx, None))
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
    subscribed: Option<RefId>,
}

impl MemoryPeer {
    /// Next command from the subscriber; `None` once its handle is gone.
    pub async fn next_command(&mut self) -> Option<ChannelCommand> {
        let command = self.commands.recv().await?;
        if let ChannelCommand::Subscribe(reference) = &command {
            self.subscribed = Some(reference.clone());
        }
        Some(command)
    }

    /// Wait until the subscriber subscribes and return the reference.
    pub async fn next_subscription(&mut self) -> Option<RefId> {
        loop {
            match self.next_command().await? {
                ChannelCommand::Subscribe(reference) => return Some(reference),
                ChannelCommand::Close => return None,
            }
        }
    }

    pub fn subscribed(&self) -> Option<&RefId> {
        self.subscribed.as_ref()
    }

    /// Push a notice. Returns false if the subscriber is gone.
    pub fn push(&self, notice: ChannelNotice) -> bool {
        self.notices.send(notice).is_ok()
    }

    pub fn push_status(&self, reference: &RefId, status: TopupStatus) -> bool {
        self.push(ChannelNotice::Status(TopupStatusEvent::new(
            reference.clone(),
            status,
        )))
    }

    /// True once the subscriber disposed or dropped its handle.
    pub fn is_closed(&self) -> bool {
        self.notices.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let channel = MemoryChannel::new();
        let mut sub = channel.open().await.unwrap();
        let mut peer = channel.accept().await.unwrap();

        assert_eq!(sub.next_notice().await, Some(ChannelNotice::Connected));

        let r1 = RefId::new("R1").unwrap();
        sub.subscribe(&r1).unwrap();
        assert_eq!(peer.next_subscription().await, Some(r1.clone()));
        assert_eq!(peer.subscribed(), Some(&r1));

        assert!(peer.push_status(&r1, TopupStatus::Completed));
        match sub.next_notice().await {
            Some(ChannelNotice::Status(event)) => assert_eq!(event.ref_id, r1),
            other => panic!("unexpected notice {:?}", other),
        }

        sub.dispose();
        assert_eq!(peer.next_command().await, Some(ChannelCommand::Close));
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_fail_next_open() {
        let channel = MemoryChannel::new();
        channel.fail_next_open(ChannelError::Connect("refused".to_string()));
        assert_eq!(
            channel.open().await.unwrap_err(),
            ChannelError::Connect("refused".to_string())
        );
        assert!(channel.open().await.is_ok());
    }

    #[tokio::test]
    async fn test_unaccepted_connections_are_bounded() {
        let channel = MemoryChannel::new();
        let mut subs = Vec::new();
        for _ in 0..MAX_PENDING_PEERS {
            subs.push(channel.open().await.unwrap());
        }
        assert!(matches!(
            channel.open().await.unwrap_err(),
            ChannelError::Connect(_)
        ));

        assert!(channel.accept().await.is_some());
        assert!(channel.open().await.is_ok());
    }
}
