//! Client-side view of one QR payment attempt.
//!
//! # States
//! - Idle: no QR issued yet (or the last quote failed)
//! - AwaitingPayment: a QR is issued and its reference is active
//! - Completed / Expired / Cancelled: terminal, active reference cleared
//!
//! # State Transitions
//! ```text
//! Idle            → AwaitingPayment: quote issued
//! AwaitingPayment → AwaitingPayment: newer quote issued (supersedes)
//! AwaitingPayment → Completed:       COMPLETED for the active reference
//! AwaitingPayment → Expired:         EXPIRED for the active reference, or countdown hit zero
//! AwaitingPayment → Cancelled:       cancel acknowledged for the active reference
//! any terminal    → AwaitingPayment: a new quote is issued
//! ```
//!
//! Failures never change the phase; they set an error banner. Events whose
//! reference is not the active one are dropped.
//!
//! The session is synchronous and does no I/O so the coordinator can feed it
//! inputs in whatever order they arrive.

use chrono::{DateTime, Utc};

use crate::payment::countdown::Countdown;
use crate::payment::error::PaymentError;
use crate::payment::types::{PaymentRequest, RefId, TopupStatus, TopupStatusEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    Idle,
    AwaitingPayment,
    Completed,
    Expired,
    Cancelled,
}

impl PaymentPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentPhase::Completed | PaymentPhase::Expired | PaymentPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPhase::Idle => "idle",
            PaymentPhase::AwaitingPayment => "awaiting_payment",
            PaymentPhase::Completed => "completed",
            PaymentPhase::Expired => "expired",
            PaymentPhase::Cancelled => "cancelled",
        }
    }
}

/// Result of feeding an input to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    Unchanged,
    /// Input referred to a reference that is no longer active.
    Stale,
    /// A request became active. `superseded` is the reference it replaced.
    Issued {
        reference: RefId,
        superseded: Option<RefId>,
    },
    Completed(RefId),
    Expired(RefId),
    Cancelled(RefId),
}

#[derive(Debug, Clone)]
struct ActiveRequest {
    request: PaymentRequest,
    countdown: Countdown,
    seconds_remaining: u64,
}

/// State of one payment attempt.
#[derive(Debug, Clone)]
pub struct PaymentSession {
    phase: PaymentPhase,
    active: Option<ActiveRequest>,
    last_reference: Option<RefId>,
    /// Countdown left on screen after the request ran out locally.
    expired_at_zero: bool,
    error: Option<PaymentError>,
    window_secs: u64,
    expire_locally: bool,
}

impl PaymentSession {
    pub fn new(window_secs: u64, expire_locally: bool) -> Self {
        Self {
            phase: PaymentPhase::Idle,
            active: None,
            last_reference: None,
            expired_at_zero: false,
            error: None,
            window_secs,
            expire_locally,
        }
    }

    pub fn phase(&self) -> PaymentPhase {
        self.phase
    }

    pub fn active_request(&self) -> Option<&PaymentRequest> {
        self.active.as_ref().map(|a| &a.request)
    }

    pub fn active_reference(&self) -> Option<&RefId> {
        self.active.as_ref().map(|a| &a.request.reference_id)
    }

    /// Reference of the most recent request, kept after it ends.
    pub fn last_reference(&self) -> Option<&RefId> {
        self.last_reference.as_ref()
    }

    pub fn seconds_remaining(&self) -> Option<u64> {
        match &self.active {
            Some(active) => Some(active.seconds_remaining),
            None if self.expired_at_zero => Some(0),
            None => None,
        }
    }

    pub fn error(&self) -> Option<&PaymentError> {
        self.error.as_ref()
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Record a failure without touching the phase.
    pub fn fail(&mut self, error: PaymentError) {
        self.error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// A quote (or a resumed pending transaction) was issued by the gateway.
    pub fn quote_issued(&mut self, request: PaymentRequest, now: DateTime<Utc>) -> Transition {
        let mut countdown = Countdown::new(request.created_at, self.window_secs);
        let seconds_remaining = countdown.tick(now);
        let reference = request.reference_id.clone();

        let superseded = self
            .active
            .take()
            .map(|a| a.request.reference_id)
            .filter(|previous| *previous != reference);

        self.active = Some(ActiveRequest {
            request,
            countdown,
            seconds_remaining,
        });
        self.last_reference = Some(reference.clone());
        self.expired_at_zero = false;
        self.phase = PaymentPhase::AwaitingPayment;
        self.error = None;

        Transition::Issued {
            reference,
            superseded,
        }
    }

    /// Apply a status push from the channel.
    pub fn apply_event(&mut self, event: &TopupStatusEvent) -> Transition {
        if self.active_reference() != Some(&event.ref_id) {
            return Transition::Stale;
        }
        self.active = None;
        self.error = None;
        match event.status {
            TopupStatus::Completed => {
                self.phase = PaymentPhase::Completed;
                Transition::Completed(event.ref_id.clone())
            }
            TopupStatus::Expired => {
                self.phase = PaymentPhase::Expired;
                self.error = Some(PaymentError::Expired);
                Transition::Expired(event.ref_id.clone())
            }
        }
    }

    /// Reference a cancel should target, if any.
    pub fn cancel_target(&self) -> Option<RefId> {
        self.active_reference().cloned()
    }

    /// The gateway acknowledged cancellation of `reference`.
    pub fn cancelled(&mut self, reference: &RefId) -> Transition {
        if self.active_reference() != Some(reference) {
            return Transition::Stale;
        }
        self.active = None;
        self.error = None;
        self.phase = PaymentPhase::Cancelled;
        Transition::Cancelled(reference.clone())
    }

    /// Refresh the countdown. Only a locally-expiring session can change
    /// phase here, and only once the countdown is at zero.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Transition {
        let Some(active) = self.active.as_mut() else {
            return Transition::Unchanged;
        };
        active.seconds_remaining = active.countdown.tick(now);

        if active.seconds_remaining > 0 || !self.expire_locally {
            return Transition::Unchanged;
        }

        let reference = active.request.reference_id.clone();
        self.active = None;
        self.expired_at_zero = true;
        self.phase = PaymentPhase::Expired;
        self.error = Some(PaymentError::Expired);
        Transition::Expired(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn created() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    fn request(reference: &str) -> PaymentRequest {
        PaymentRequest {
            amount: "150".parse().unwrap(),
            reference_id: RefId::new(reference).unwrap(),
            qr_image_data: "data:image/png;base64,AAAA".to_string(),
            created_at: created(),
        }
    }

    fn event(reference: &str, status: TopupStatus) -> TopupStatusEvent {
        TopupStatusEvent::new(RefId::new(reference).unwrap(), status)
    }

    fn awaiting(reference: &str) -> PaymentSession {
        let mut session = PaymentSession::new(955, true);
        session.quote_issued(request(reference), created());
        session
    }

    #[test]
    fn test_quote_moves_idle_to_awaiting_once() {
        let mut session = PaymentSession::new(955, true);
        assert_eq!(session.phase(), PaymentPhase::Idle);

        let transition = session.quote_issued(request("R1"), created());
        assert_eq!(
            transition,
            Transition::Issued {
                reference: RefId::new("R1").unwrap(),
                superseded: None
            }
        );
        assert_eq!(session.phase(), PaymentPhase::AwaitingPayment);
        assert_eq!(session.active_reference().unwrap().as_str(), "R1");
        assert_eq!(session.seconds_remaining(), Some(955));
    }

    #[test]
    fn test_new_quote_supersedes_active_one() {
        let mut session = awaiting("R1");
        let transition = session.quote_issued(request("R2"), created());
        assert_eq!(
            transition,
            Transition::Issued {
                reference: RefId::new("R2").unwrap(),
                superseded: Some(RefId::new("R1").unwrap())
            }
        );

        assert_eq!(session.apply_event(&event("R1", TopupStatus::Completed)), Transition::Stale);
        assert_eq!(session.phase(), PaymentPhase::AwaitingPayment);
    }

    #[test]
    fn test_completed_clears_reference_and_ignores_late_events() {
        let mut session = awaiting("R1");
        assert_eq!(
            session.apply_event(&event("R1", TopupStatus::Completed)),
            Transition::Completed(RefId::new("R1").unwrap())
        );
        assert_eq!(session.phase(), PaymentPhase::Completed);
        assert!(session.active_reference().is_none());
        assert!(session.error().is_none());

        assert_eq!(session.apply_event(&event("R1", TopupStatus::Expired)), Transition::Stale);
        assert_eq!(session.apply_event(&event("R1", TopupStatus::Completed)), Transition::Stale);
        assert_eq!(session.phase(), PaymentPhase::Completed);
    }

    #[test]
    fn test_expired_event() {
        let mut session = awaiting("R1");
        assert_eq!(
            session.apply_event(&event("R1", TopupStatus::Expired)),
            Transition::Expired(RefId::new("R1").unwrap())
        );
        assert_eq!(session.phase(), PaymentPhase::Expired);
        assert!(!session.has_active());
        assert_eq!(session.error(), Some(&PaymentError::Expired));
    }

    #[test]
    fn test_event_for_other_reference_is_dropped() {
        let mut session = awaiting("R1");
        assert_eq!(session.apply_event(&event("R2", TopupStatus::Expired)), Transition::Stale);
        assert_eq!(session.phase(), PaymentPhase::AwaitingPayment);
        assert_eq!(session.active_reference().unwrap().as_str(), "R1");
    }

    #[test]
    fn test_event_while_idle_is_dropped() {
        let mut session = PaymentSession::new(955, true);
        assert_eq!(session.apply_event(&event("R1", TopupStatus::Completed)), Transition::Stale);
        assert_eq!(session.phase(), PaymentPhase::Idle);
    }

    #[test]
    fn test_cancel_without_active_reference_has_no_target() {
        let session = PaymentSession::new(955, true);
        assert!(session.cancel_target().is_none());
    }

    #[test]
    fn test_cancelled_then_late_events_ignored() {
        let mut session = awaiting("R1");
        let target = session.cancel_target().unwrap();
        assert_eq!(session.cancelled(&target), Transition::Cancelled(target.clone()));
        assert_eq!(session.phase(), PaymentPhase::Cancelled);

        assert_eq!(session.apply_event(&event("R1", TopupStatus::Completed)), Transition::Stale);
        assert_eq!(session.phase(), PaymentPhase::Cancelled);
        assert_eq!(session.last_reference(), Some(&target));
    }

    #[test]
    fn test_cancel_ack_for_superseded_reference_is_stale() {
        let mut session = awaiting("R1");
        let old = session.cancel_target().unwrap();
        session.quote_issued(request("R2"), created());
        assert_eq!(session.cancelled(&old), Transition::Stale);
        assert_eq!(session.phase(), PaymentPhase::AwaitingPayment);
    }

    #[test]
    fn test_failure_keeps_phase() {
        let mut session = PaymentSession::new(955, true);
        session.fail(PaymentError::InvalidAmount);
        assert_eq!(session.phase(), PaymentPhase::Idle);
        assert_eq!(session.error(), Some(&PaymentError::InvalidAmount));

        let mut session = awaiting("R1");
        session.fail(PaymentError::ChannelError {
            detail: "refused".to_string(),
        });
        assert_eq!(session.phase(), PaymentPhase::AwaitingPayment);
        assert!(session.has_active());
    }

    #[test]
    fn test_tick_counts_down_then_expires_locally() {
        let mut session = awaiting("R1");
        assert_eq!(session.tick(created() + Duration::seconds(5)), Transition::Unchanged);
        assert_eq!(session.seconds_remaining(), Some(950));

        let transition = session.tick(created() + Duration::seconds(955));
        assert_eq!(transition, Transition::Expired(RefId::new("R1").unwrap()));
        assert_eq!(session.phase(), PaymentPhase::Expired);
        assert_eq!(session.seconds_remaining(), Some(0));

        assert_eq!(session.tick(created() + Duration::seconds(960)), Transition::Unchanged);
        assert_eq!(session.seconds_remaining(), Some(0));

        session.quote_issued(request("R2"), created() + Duration::seconds(960));
        assert_eq!(session.seconds_remaining(), Some(955));
    }

    #[test]
    fn test_tick_without_local_expiry_holds_at_zero() {
        let mut session = PaymentSession::new(955, false);
        session.quote_issued(request("R1"), created());

        let at_expiry = created() + Duration::seconds(955);
        assert_eq!(session.tick(at_expiry), Transition::Unchanged);
        assert_eq!(session.tick(at_expiry + Duration::seconds(3)), Transition::Unchanged);
        assert_eq!(session.seconds_remaining(), Some(0));
        assert_eq!(session.phase(), PaymentPhase::AwaitingPayment);

        assert_eq!(
            session.apply_event(&event("R1", TopupStatus::Expired)),
            Transition::Expired(RefId::new("R1").unwrap())
        );
    }
}
