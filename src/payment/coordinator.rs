//! Payment coordinator: drives one payment session.
//!
//! # Data Flow
//! ```text
//! PaymentHandle ──commands──▶ ┌──────────────────────────┐ ──watch──▶ PaymentView
//!                             │ coordinator task         │ ──mpsc───▶ PaymentNotice
//! JoinSet (gateway, open) ───▶│   select! loop           │
//! Subscription notices ──────▶│   PaymentSession         │
//! Interval ticks ────────────▶└──────────────────────────┘
//! ```
//!
//! # Design Decisions
//! - One task per payment attempt; nothing is shared between instances
//! - Network calls never block the loop; they run in a `JoinSet`
//! - Quote results carry a sequence number; older results than the last
//!   applied one are dropped
//! - The channel subscription, the ticker and in-flight calls are released
//!   on every exit path, and nothing is published afterwards

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::channel::{Channel, ChannelError, ChannelNotice, Subscription};
use crate::config::CountdownConfig;
use crate::gateway::{Gateway, GatewayResult};
use crate::observability::metrics;
use crate::payment::countdown::{format_remaining, Clock, SystemClock};
use crate::payment::error::{Operation, PaymentError};
use crate::payment::session::{PaymentPhase, PaymentSession, Transition};
use crate::payment::types::{Amount, CurrentUser, PaymentRequest, RefId};

/// How long `dispose()` waits for the session task to wind down.
const DISPOSE_GRACE: Duration = Duration::from_secs(2);

/// How a session begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// Request a fresh QR for the amount.
    Quote(Amount),
    /// Show the user's pending transaction if there is one, else quote the amount.
    Resume(Amount),
}

/// The payment session has already been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("payment session has ended")]
pub struct SessionClosed;

/// Snapshot published after every state change.
#[derive(Debug, Clone)]
pub struct PaymentView {
    pub session: Uuid,
    pub phase: PaymentPhase,
    /// Amount most recently selected.
    pub amount: Option<Amount>,
    pub request: Option<PaymentRequest>,
    pub seconds_remaining: Option<u64>,
    /// `MM:SS` form of `seconds_remaining`.
    pub countdown: Option<String>,
    pub error: Option<PaymentError>,
    /// A quote or cancel is in flight.
    pub busy: bool,
    pub channel_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackLevel {
    Success,
    Info,
    Error,
}

/// One-off events for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentNotice {
    Completed(RefId),
    Expired(RefId),
    Cancelled(RefId),
    Failed(PaymentError),
    /// The flow is finished and whatever hosts it should close.
    CloseRequested,
}

impl PaymentNotice {
    /// User-facing message for this notice, if it has one.
    pub fn feedback(&self) -> Option<(FeedbackLevel, String)> {
        match self {
            PaymentNotice::Completed(_) => {
                Some((FeedbackLevel::Success, "Transaction completed".to_string()))
            }
            PaymentNotice::Expired(_) => {
                Some((FeedbackLevel::Error, PaymentError::Expired.to_string()))
            }
            PaymentNotice::Cancelled(_) => {
                Some((FeedbackLevel::Info, "Transaction cancelled".to_string()))
            }
            PaymentNotice::Failed(err) => Some((FeedbackLevel::Error, err.to_string())),
            PaymentNotice::CloseRequested => None,
        }
    }
}

#[derive(Debug)]
enum Command {
    SetAmount(Amount),
    Retry,
    Cancel,
    Dispose,
}

/// Starts payment sessions against one gateway and channel.
#[derive(Clone)]
pub struct PaymentCoordinator {
    config: CountdownConfig,
    gateway: Arc<dyn Gateway>,
    channel: Arc<dyn Channel>,
    clock: Arc<dyn Clock>,
}

impl PaymentCoordinator {
    pub fn new(config: CountdownConfig, gateway: Arc<dyn Gateway>, channel: Arc<dyn Channel>) -> Self {
        Self {
            config,
            gateway,
            channel,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn a new session task. Must be called inside a tokio runtime.
    pub fn start(&self, user: Option<CurrentUser>, start: Start) -> PaymentHandle {
        let id = Uuid::new_v4();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let session = PaymentSession::new(self.config.window_secs, self.config.expire_locally);
        let initial = PaymentView {
            session: id,
            phase: session.phase(),
            amount: None,
            request: None,
            seconds_remaining: None,
            countdown: None,
            error: None,
            busy: false,
            channel_connected: false,
        };
        let (view_tx, view_rx) = watch::channel(initial);

        let task = SessionTask {
            id,
            tick_interval: Duration::from_millis(self.config.tick_interval_ms.max(1)),
            gateway: self.gateway.clone(),
            channel: self.channel.clone(),
            clock: self.clock.clone(),
            user,
            amount: None,
            session,
            subscription: None,
            opening: false,
            channel_connected: false,
            ops: JoinSet::new(),
            quote_seq: 0,
            applied_seq: 0,
            quotes_in_flight: 0,
            cancelling: None,
            ticker: None,
            commands: cmd_rx,
            view: view_tx,
            notices: notice_tx,
        };

        tracing::info!(session = %id, start = ?start, "Starting payment session");
        let handle = tokio::spawn(task.run(start));

        PaymentHandle {
            id,
            commands: cmd_tx,
            view: view_rx,
            notices: notice_rx,
            task: Some(handle),
        }
    }
}

impl std::fmt::Debug for PaymentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentCoordinator")
            .field("config", &self.config)
            .finish()
    }
}

/// Caller's side of a running payment session.
#[derive(Debug)]
pub struct PaymentHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<PaymentView>,
    notices: mpsc::UnboundedReceiver<PaymentNotice>,
    task: Option<JoinHandle<()>>,
}

impl PaymentHandle {
    pub fn session_id(&self) -> Uuid {
        self.id
    }

    /// Change the amount; issues a quote that supersedes the active one.
    pub fn set_amount(&self, amount: Amount) -> Result<(), SessionClosed> {
        self.send(Command::SetAmount(amount))
    }

    /// Request a quote for the current amount again, e.g. after a failure.
    pub fn request_quote(&self) -> Result<(), SessionClosed> {
        self.send(Command::Retry)
    }

    /// Cancel the active transaction. No-op when nothing is active.
    pub fn cancel(&self) -> Result<(), SessionClosed> {
        self.send(Command::Cancel)
    }

    /// Latest published view.
    pub fn view(&self) -> PaymentView {
        self.view.borrow().clone()
    }

    /// Receiver that wakes on every published view.
    pub fn watch(&self) -> watch::Receiver<PaymentView> {
        self.view.clone()
    }

    /// Next notice; `None` once the session has ended.
    pub async fn next_notice(&mut self) -> Option<PaymentNotice> {
        self.notices.recv().await
    }

    /// Tear the session down and wait for it. Safe to call more than once.
    pub async fn dispose(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.commands.send(Command::Dispose);

        let abort = task.abort_handle();
        if tokio::time::timeout(DISPOSE_GRACE, task).await.is_err() {
            tracing::warn!(session = %self.id, "Payment session did not stop in time, aborting");
            abort.abort();
        }
        self.notices.close();
    }

    fn send(&self, command: Command) -> Result<(), SessionClosed> {
        if self.task.is_none() {
            return Err(SessionClosed);
        }
        self.commands.send(command).map_err(|_| SessionClosed)
    }
}

impl Drop for PaymentHandle {
    fn drop(&mut self) {
        if self.task.take().is_some() {
            let _ = self.commands.send(Command::Dispose);
        }
    }
}

/// Completion of work spawned into the `JoinSet`.
enum OpResult {
    Quote {
        seq: u64,
        result: GatewayResult<PaymentRequest>,
    },
    Resume {
        fallback: Amount,
        result: GatewayResult<Option<PaymentRequest>>,
    },
    Cancel {
        reference: RefId,
        result: GatewayResult<()>,
    },
    Opened(Result<Subscription, ChannelError>),
}

struct SessionTask {
    id: Uuid,
    tick_interval: Duration,
    gateway: Arc<dyn Gateway>,
    channel: Arc<dyn Channel>,
    clock: Arc<dyn Clock>,
    user: Option<CurrentUser>,
    amount: Option<Amount>,
    session: PaymentSession,
    subscription: Option<Subscription>,
    opening: bool,
    channel_connected: bool,
    ops: JoinSet<OpResult>,
    quote_seq: u64,
    applied_seq: u64,
    quotes_in_flight: usize,
    cancelling: Option<RefId>,
    ticker: Option<Interval>,
    commands: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<PaymentView>,
    notices: mpsc::UnboundedSender<PaymentNotice>,
}

impl SessionTask {
    async fn run(mut self, start: Start) {
        self.open_channel();
        match start {
            Start::Quote(amount) => self.set_amount(amount),
            Start::Resume(amount) => self.resume(amount),
        }
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SetAmount(amount)) => self.set_amount(amount),
                    Some(Command::Retry) => self.retry(),
                    Some(Command::Cancel) => self.cancel(),
                    Some(Command::Dispose) | None => break,
                },
                Some(joined) = self.ops.join_next(), if !self.ops.is_empty() => match joined {
                    Ok(result) => self.on_op(result),
                    Err(e) => tracing::error!(session = %self.id, error = %e, "Gateway task failed"),
                },
                notice = next_notice(&mut self.subscription) => self.on_channel(notice),
                _ = next_tick(&mut self.ticker) => self.on_tick(),
            }
            self.publish();
        }

        self.teardown();
    }

    fn set_amount(&mut self, amount: Amount) {
        tracing::debug!(session = %self.id, amount = %amount, "Amount selected");
        self.amount = Some(amount);
        self.spawn_quote(amount);
    }

    fn retry(&mut self) {
        match self.amount {
            Some(amount) => self.spawn_quote(amount),
            None => self.fail(PaymentError::InvalidAmount),
        }
    }

    fn resume(&mut self, fallback: Amount) {
        self.amount = Some(fallback);
        let Some(user) = self.user.clone() else {
            tracing::debug!(session = %self.id, "No user to resume for, requesting a new quote");
            self.spawn_quote(fallback);
            return;
        };

        let gateway = self.gateway.clone();
        self.quotes_in_flight += 1;
        self.ops.spawn(async move {
            let result = gateway.current_transaction(&user).await;
            OpResult::Resume { fallback, result }
        });
    }

    fn spawn_quote(&mut self, amount: Amount) {
        self.quote_seq += 1;
        let seq = self.quote_seq;
        let gateway = self.gateway.clone();
        let user = self.user.clone();

        tracing::info!(session = %self.id, amount = %amount, seq, "Requesting QR code");
        self.quotes_in_flight += 1;
        self.ops.spawn(async move {
            let result = gateway.request_quote(amount, user.as_ref()).await;
            OpResult::Quote { seq, result }
        });
    }

    fn cancel(&mut self) {
        let Some(reference) = self.session.cancel_target() else {
            tracing::debug!(session = %self.id, "Nothing to cancel");
            return;
        };
        if self.cancelling.as_ref() == Some(&reference) {
            return;
        }

        tracing::info!(session = %self.id, ref_id = %reference, "Cancelling transaction");
        self.cancelling = Some(reference.clone());
        let gateway = self.gateway.clone();
        self.ops.spawn(async move {
            let result = gateway.cancel(&reference).await;
            OpResult::Cancel { reference, result }
        });
    }

    fn open_channel(&mut self) {
        if self.subscription.is_some() || self.opening {
            return;
        }
        self.opening = true;
        let channel = self.channel.clone();
        self.ops.spawn(async move { OpResult::Opened(channel.open().await) });
    }

    fn on_op(&mut self, result: OpResult) {
        match result {
            OpResult::Quote { seq, result } => {
                self.quotes_in_flight = self.quotes_in_flight.saturating_sub(1);
                if seq < self.applied_seq {
                    tracing::debug!(session = %self.id, seq, "Dropping superseded quote result");
                    metrics::record_quote("dropped");
                    return;
                }
                self.applied_seq = seq;
                match result {
                    Ok(request) => self.issue(request),
                    Err(e) => {
                        tracing::warn!(session = %self.id, error = %e, "Quote request failed");
                        metrics::record_quote("failed");
                        self.fail(PaymentError::from_gateway(Operation::Quote, &e));
                    }
                }
            }
            OpResult::Resume { fallback, result } => {
                self.quotes_in_flight = self.quotes_in_flight.saturating_sub(1);
                if self.quote_seq > 0 {
                    // The user already picked an amount; that quote wins.
                    return;
                }
                match result {
                    Ok(Some(request)) => {
                        tracing::info!(session = %self.id, ref_id = %request.reference_id, "Resuming pending transaction");
                        self.amount = Some(request.amount);
                        self.issue(request);
                    }
                    Ok(None) => self.spawn_quote(fallback),
                    Err(e) => {
                        tracing::warn!(session = %self.id, error = %e, "Pending transaction lookup failed");
                        self.fail(PaymentError::from_gateway(Operation::PendingLookup, &e));
                    }
                }
            }
            OpResult::Cancel { reference, result } => {
                if self.cancelling.as_ref() == Some(&reference) {
                    self.cancelling = None;
                }
                match result {
                    Ok(()) => {
                        let transition = self.session.cancelled(&reference);
                        self.on_transition(transition);
                    }
                    Err(e) => {
                        tracing::warn!(session = %self.id, ref_id = %reference, error = %e, "Cancel failed");
                        if self.session.active_reference() == Some(&reference) {
                            self.fail(PaymentError::from_gateway(Operation::Cancel, &e));
                        }
                    }
                }
            }
            OpResult::Opened(result) => {
                self.opening = false;
                match result {
                    Ok(mut subscription) => {
                        if let Some(reference) = self.session.active_reference() {
                            if let Err(e) = subscription.subscribe(reference) {
                                tracing::warn!(session = %self.id, error = %e, "Subscribe failed");
                            }
                        }
                        self.subscription = Some(subscription);
                    }
                    Err(e) => self.channel_failed(&e),
                }
            }
        }
    }

    fn issue(&mut self, request: PaymentRequest) {
        let transition = self.session.quote_issued(request, self.clock.now());
        self.on_transition(transition);
    }

    fn on_channel(&mut self, notice: Option<ChannelNotice>) {
        match notice {
            Some(ChannelNotice::Connected) => {
                self.channel_connected = true;
                if matches!(self.session.error(), Some(PaymentError::ChannelError { .. })) {
                    self.session.clear_error();
                }
            }
            Some(ChannelNotice::Disconnected) => self.channel_connected = false,
            Some(ChannelNotice::Error(e)) => self.channel_failed(&e),
            Some(ChannelNotice::Status(event)) => {
                let transition = self.session.apply_event(&event);
                if transition == Transition::Stale {
                    tracing::debug!(
                        session = %self.id,
                        ref_id = %event.ref_id,
                        status = event.status.as_str(),
                        "Ignoring event for inactive reference"
                    );
                    metrics::record_stale_event();
                    return;
                }
                self.on_transition(transition);
            }
            None => {
                tracing::debug!(session = %self.id, "Status channel ended");
                self.channel_connected = false;
                if let Some(mut subscription) = self.subscription.take() {
                    subscription.dispose();
                }
            }
        }
    }

    fn on_tick(&mut self) {
        let transition = self.session.tick(self.clock.now());
        self.on_transition(transition);
    }

    fn on_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Unchanged | Transition::Stale => {}
            Transition::Issued {
                reference,
                superseded,
            } => {
                tracing::info!(
                    session = %self.id,
                    ref_id = %reference,
                    superseded = ?superseded,
                    "QR code issued"
                );
                metrics::record_quote("issued");
                self.subscribe(&reference);
                self.start_ticker();
            }
            Transition::Completed(reference) => {
                tracing::info!(session = %self.id, ref_id = %reference, "Transaction completed");
                self.finish("completed");
                self.notify(PaymentNotice::Completed(reference));
                self.notify(PaymentNotice::CloseRequested);
            }
            Transition::Expired(reference) => {
                tracing::info!(session = %self.id, ref_id = %reference, "Transaction expired");
                self.finish("expired");
                self.notify(PaymentNotice::Expired(reference));
            }
            Transition::Cancelled(reference) => {
                tracing::info!(session = %self.id, ref_id = %reference, "Transaction cancelled");
                self.finish("cancelled");
                self.notify(PaymentNotice::Cancelled(reference));
                self.notify(PaymentNotice::CloseRequested);
            }
        }
    }

    fn subscribe(&mut self, reference: &RefId) {
        match self.subscription.as_mut() {
            Some(subscription) => {
                if let Err(e) = subscription.subscribe(reference) {
                    self.channel_failed(&e);
                    self.subscription = None;
                    self.open_channel();
                }
            }
            None => self.open_channel(),
        }
    }

    fn start_ticker(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    fn finish(&mut self, status: &'static str) {
        self.ticker = None;
        self.cancelling = None;
        metrics::record_terminal(status);
    }

    fn channel_failed(&mut self, error: &ChannelError) {
        tracing::warn!(session = %self.id, error = %error, "Status channel error");
        metrics::record_channel_error("session");
        self.channel_connected = false;
        self.fail(PaymentError::from_channel(error));
    }

    fn fail(&mut self, error: PaymentError) {
        self.session.fail(error.clone());
        self.notify(PaymentNotice::Failed(error));
    }

    fn notify(&self, notice: PaymentNotice) {
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        let seconds_remaining = self.session.seconds_remaining();
        self.view.send_replace(PaymentView {
            session: self.id,
            phase: self.session.phase(),
            amount: self.amount,
            request: self.session.active_request().cloned(),
            seconds_remaining,
            countdown: seconds_remaining.map(format_remaining),
            error: self.session.error().cloned(),
            busy: self.quotes_in_flight > 0 || self.cancelling.is_some(),
            channel_connected: self.channel_connected,
        });
    }

    fn teardown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.dispose();
        }
        self.ticker = None;
        self.ops.abort_all();
        tracing::info!(
            session = %self.id,
            phase = self.session.phase().as_str(),
            "Payment session disposed"
        );
    }
}

async fn next_notice(subscription: &mut Option<Subscription>) -> Option<ChannelNotice> {
    match subscription {
        Some(subscription) => subscription.next_notice().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
