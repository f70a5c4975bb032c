//! Sandbox HTTP and WebSocket server.
//!
//! # Responsibilities
//! - Serve the gateway REST contract from `SandboxState`
//! - Let testers settle transactions by hand
//! - Push status events to subscribed WebSocket clients

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::channel::protocol::{self, EventNames, Inbound};
use crate::config::SandboxConfig;
use crate::gateway::types::{CurrentTopupRequest, ErrorBody};
use crate::lifecycle::Shutdown;
use crate::payment::types::TopupStatus;
use crate::sandbox::state::SandboxState;

#[derive(Clone)]
struct AppState {
    sandbox: Arc<SandboxState>,
    names: EventNames,
}

/// Sandbox gateway server.
pub struct SandboxServer {
    router: Router,
    state: Arc<SandboxState>,
}

impl SandboxServer {
    pub fn new(config: &SandboxConfig, names: EventNames, shutdown: Shutdown) -> Self {
        let state = SandboxState::new(Duration::from_secs(config.expire_after_secs), shutdown);
        let router = Self::build_router(AppState {
            sandbox: state.clone(),
            names,
        });
        Self { router, state }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/topup", get(create_topup))
            .route("/topup/current", post(current_topup))
            .route("/topup/{ref_id}", delete(cancel_topup))
            .route("/sandbox/topup/{ref_id}/complete", post(complete_topup))
            .route("/sandbox/topup/{ref_id}/expire", post(expire_topup))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    pub fn state(&self) -> Arc<SandboxState> {
        self.state.clone()
    }

    /// Serve until the shutdown broadcast fires.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Sandbox gateway starting");

        let shutdown = self.state.shutdown().wait();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Sandbox gateway stopped");
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopupQuery {
    amount: Option<String>,
    user_id: Option<String>,
}

async fn create_topup(
    State(state): State<AppState>,
    Query(query): Query<TopupQuery>,
) -> Response {
    let amount = query
        .amount
        .as_deref()
        .and_then(|a| Decimal::from_str(a.trim()).ok())
        .filter(|a| *a > Decimal::ZERO);

    match amount {
        Some(amount) => Json(state.sandbox.create(amount, query.user_id)).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, "Invalid amount"),
    }
}

async fn cancel_topup(State(state): State<AppState>, Path(ref_id): Path<String>) -> Response {
    if state.sandbox.cancel(&ref_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Transaction not found")
    }
}

async fn current_topup(
    State(state): State<AppState>,
    Json(request): Json<CurrentTopupRequest>,
) -> Response {
    match state.sandbox.current(&request.user_id) {
        Some(topup) => Json(topup).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No pending transaction"),
    }
}

async fn complete_topup(State(state): State<AppState>, Path(ref_id): Path<String>) -> Response {
    settle(&state, &ref_id, TopupStatus::Completed)
}

async fn expire_topup(State(state): State<AppState>, Path(ref_id): Path<String>) -> Response {
    settle(&state, &ref_id, TopupStatus::Expired)
}

fn settle(state: &AppState, ref_id: &str, status: TopupStatus) -> Response {
    match state.sandbox.finish(ref_id, status) {
        Some(event) => Json(event).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Transaction not found"),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One status channel connection. A client may subscribe to several
/// references; each settled one is pushed once.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.sandbox.subscribe();
    let mut shutdown = state.sandbox.shutdown().subscribe();
    let mut subscribed: HashSet<String> = HashSet::new();

    tracing::debug!("Status channel client connected");
    loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => match protocol::decode(&state.names, text.as_str()) {
                    Ok(Inbound::Subscribe(reference)) => {
                        tracing::debug!(ref_id = %reference, "Client subscribed");
                        if subscribed.insert(reference.to_string()) {
                            state.sandbox.watch(reference.as_str());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(error = %e, "Ignoring malformed client frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Status channel client errored");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if !subscribed.remove(event.ref_id.as_str()) {
                        continue;
                    }
                    state.sandbox.unwatch(event.ref_id.as_str());
                    let frame = protocol::encode_status(&state.names, &event);
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Status channel client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
    for ref_id in &subscribed {
        state.sandbox.unwatch(ref_id);
    }
    tracing::debug!("Status channel client disconnected");
}
