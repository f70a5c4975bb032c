//! In-memory transaction store of the sandbox gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::gateway::TopupResponse;
use crate::lifecycle::Shutdown;
use crate::payment::types::{RefId, TopupStatus, TopupStatusEvent};

/// Status events are fanned out through a bounded broadcast; slow sockets
/// skip ahead.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
struct PendingTopup {
    response: TopupResponse,
    user_id: Option<String>,
}

/// Pending transactions and the status event feed.
#[derive(Debug)]
pub struct SandboxState {
    pending: Mutex<HashMap<String, PendingTopup>>,
    watchers: Mutex<HashMap<String, usize>>,
    events: broadcast::Sender<TopupStatusEvent>,
    expire_after: Duration,
    shutdown: Shutdown,
}

impl SandboxState {
    pub fn new(expire_after: Duration, shutdown: Shutdown) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            events,
            expire_after,
            shutdown,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopupStatusEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Issue a new pending transaction and arm its expiry timer.
    pub fn create(self: &Arc<Self>, amount: Decimal, user_id: Option<String>) -> TopupResponse {
        let ref_id = format!(
            "TOPUP-{}",
            Uuid::new_v4().simple().to_string()[..12].to_uppercase()
        );
        let response = TopupResponse {
            qr_code: placeholder_qr(&ref_id, amount),
            ref_id: ref_id.clone(),
            created_at: Utc::now(),
            amount,
        };

        self.lock().insert(
            ref_id.clone(),
            PendingTopup {
                response: response.clone(),
                user_id,
            },
        );
        tracing::info!(ref_id = %ref_id, amount = %amount, "Sandbox transaction created");

        let state = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let expire_after = self.expire_after;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(expire_after) => {
                    state.finish(&ref_id, TopupStatus::Expired);
                }
                _ = shutdown.recv() => {}
            }
        });

        response
    }

    /// Drop a pending transaction. False if it is unknown.
    pub fn cancel(&self, ref_id: &str) -> bool {
        let removed = self.lock().remove(ref_id).is_some();
        if removed {
            tracing::info!(ref_id = %ref_id, "Sandbox transaction cancelled");
        }
        removed
    }

    /// Most recent pending transaction of `user_id`.
    pub fn current(&self, user_id: &str) -> Option<TopupResponse> {
        self.lock()
            .values()
            .filter(|p| p.user_id.as_deref() == Some(user_id))
            .map(|p| p.response.clone())
            .max_by_key(|r| r.created_at)
    }

    /// A status channel client subscribed to `ref_id`.
    pub fn watch(&self, ref_id: &str) {
        *lock(&self.watchers).entry(ref_id.to_string()).or_insert(0) += 1;
    }

    pub fn unwatch(&self, ref_id: &str) {
        let mut watchers = lock(&self.watchers);
        if let Some(count) = watchers.get_mut(ref_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                watchers.remove(ref_id);
            }
        }
    }

    /// Number of status channel clients subscribed to `ref_id`.
    pub fn watcher_count(&self, ref_id: &str) -> usize {
        lock(&self.watchers).get(ref_id).copied().unwrap_or(0)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Settle a pending transaction and push its status. `None` if the
    /// reference is unknown or already settled.
    pub fn finish(&self, ref_id: &str, status: TopupStatus) -> Option<TopupStatusEvent> {
        let pending = self.lock().remove(ref_id)?;
        let reference = RefId::new(ref_id).ok()?;

        let mut event = TopupStatusEvent::new(reference, status);
        event.amount = Some(pending.response.amount);
        event.timestamp = Some(Utc::now().to_rfc3339());

        tracing::info!(ref_id = %ref_id, status = status.as_str(), "Sandbox transaction settled");
        // No receivers just means no socket is listening.
        let _ = self.events.send(event.clone());
        Some(event)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingTopup>> {
        lock(&self.pending)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn placeholder_qr(ref_id: &str, amount: Decimal) -> String {
    format!(
        "data:text/plain;charset=utf-8,promptpay-sandbox%3A{}%3A{}",
        ref_id,
        amount.normalize()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<SandboxState> {
        SandboxState::new(Duration::from_secs(60), Shutdown::new())
    }

    #[tokio::test]
    async fn test_create_and_cancel() {
        let state = state();
        let created = state.create(Decimal::new(150, 0), None);
        assert!(created.ref_id.starts_with("TOPUP-"));
        assert!(created.qr_code.starts_with("data:"));
        assert_eq!(state.pending_count(), 1);

        assert!(state.cancel(&created.ref_id));
        assert!(!state.cancel(&created.ref_id));
        assert_eq!(state.pending_count(), 0);
        state.shutdown().trigger();
    }

    #[tokio::test]
    async fn test_current_is_per_user() {
        let state = state();
        state.create(Decimal::new(100, 0), Some("saas-1".to_string()));
        let mine = state.create(Decimal::new(200, 0), Some("saas-2".to_string()));

        assert_eq!(state.current("saas-2").unwrap().ref_id, mine.ref_id);
        assert!(state.current("saas-3").is_none());
        state.shutdown().trigger();
    }

    #[tokio::test]
    async fn test_finish_broadcasts_once() {
        let state = state();
        let mut events = state.subscribe();
        let created = state.create(Decimal::new(150, 0), None);

        let event = state.finish(&created.ref_id, TopupStatus::Completed).unwrap();
        assert_eq!(event.amount, Some(Decimal::new(150, 0)));
        assert_eq!(events.recv().await.unwrap(), event);

        assert!(state.finish(&created.ref_id, TopupStatus::Expired).is_none());
        state.shutdown().trigger();
    }

    #[test]
    fn test_watchers_are_counted() {
        let state = state();
        state.watch("R1");
        state.watch("R1");
        assert_eq!(state.watcher_count("R1"), 2);
        state.unwatch("R1");
        state.unwatch("R1");
        state.unwatch("R1");
        assert_eq!(state.watcher_count("R1"), 0);
    }

    #[tokio::test]
    async fn test_expiry_timer() {
        let state = SandboxState::new(Duration::from_millis(20), Shutdown::new());
        let mut events = state.subscribe();
        let created = state.create(Decimal::new(150, 0), None);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.ref_id.as_str(), created.ref_id);
        assert_eq!(event.status, TopupStatus::Expired);
        assert_eq!(state.pending_count(), 0);
    }
}
