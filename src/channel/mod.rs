//! Real-time status channel subsystem.
//!
//! # Data Flow
//! ```text
//! Channel::open()
//!     → transport task (websocket.rs or memory.rs)
//!     → Subscription handle
//!         commands: Subscribe(refId) / Close  ──▶ transport
//!         notices:  Connected / Status / Error / Disconnected ◀── transport
//! ```
//!
//! # Design Decisions
//! - One event stream per subscription; no callback registration
//! - `dispose()` is explicit, idempotent, and also runs on drop
//! - Reconnection belongs to the transport, never to the payment flow
//! - Subscribing to a new reference supersedes the previous one; the payment
//!   session drops events for anything but the active reference

pub mod memory;
pub mod protocol;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::payment::types::{RefId, TopupStatusEvent};

/// How long a transport gets to close cleanly after `dispose()`.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub use memory::{MemoryChannel, MemoryPeer};
pub use websocket::WebSocketChannel;

/// Errors raised by channel transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timed out after {0} seconds")]
    Timeout(u64),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("channel closed")]
    Closed,
}

/// Instructions from the subscriber to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Subscribe(RefId),
    Close,
}

/// What the transport reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    Connected,
    Status(TopupStatusEvent),
    Error(ChannelError),
    Disconnected,
}

/// A connection factory for status channels.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn open(&self) -> Result<Subscription, ChannelError>;
}

/// Handle to an open channel connection.
#[derive(Debug)]
pub struct Subscription {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    notices: mpsc::UnboundedReceiver<ChannelNotice>,
    task: Option<JoinHandle<()>>,
    current: Option<RefId>,
    disposed: bool,
}

impl Subscription {
    /// Assemble a handle from a transport's command and notice queues and,
    /// when it has one, the task driving it.
    pub fn new(
        commands: mpsc::UnboundedSender<ChannelCommand>,
        notices: mpsc::UnboundedReceiver<ChannelNotice>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            commands,
            notices,
            task,
            current: None,
            disposed: false,
        }
    }

    /// Register interest in `reference`, superseding any previous one.
    pub fn subscribe(&mut self, reference: &RefId) -> Result<(), ChannelError> {
        if self.disposed {
            return Err(ChannelError::Closed);
        }
        self.commands
            .send(ChannelCommand::Subscribe(reference.clone()))
            .map_err(|_| ChannelError::Closed)?;
        self.current = Some(reference.clone());
        tracing::debug!(ref_id = %reference, "Subscribed to status updates");
        Ok(())
    }

    /// Reference most recently subscribed to.
    pub fn current(&self) -> Option<&RefId> {
        self.current.as_ref()
    }

    /// Next notice from the transport. `None` once the transport is gone
    /// or the handle was disposed.
    pub async fn next_notice(&mut self) -> Option<ChannelNotice> {
        if self.disposed {
            return None;
        }
        self.notices.recv().await
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the connection. Safe to call more than once; only the first
    /// call has an effect.
    pub fn dispose(&mut self) {
        if self.release() {
            tracing::debug!("Channel subscription disposed");
        }
    }

    fn release(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        let _ = self.commands.send(ChannelCommand::Close);
        self.notices.close();

        if let Some(task) = self.task.take() {
            // The transport stops on `Close`; abort it if it lingers.
            let abort = task.abort_handle();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                            abort.abort();
                        }
                    });
                }
                Err(_) => abort.abort(),
            }
        }
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
