use crate::config::ServiceConfig;
use crate::ledger::JsonLedger;
use crate::presenter::{BroadcastPresenter, OutboundEvent};
use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, State as AxumState};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use meltdown_execution::{Controller, Deadline, Ledger, RngCrashSource, TokioScheduler};
use meltdown_types::meltdown::{
    Accepted, ActionId, ActionKind, ParticipantId, Rejection, SessionId,
};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub type ServiceController = Controller<
    Arc<JsonLedger>,
    BroadcastPresenter,
    Arc<TokioScheduler>,
    RngCrashSource<StdRng>,
>;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ServiceController>,
    pub presenter: BroadcastPresenter,
    pub admin_token: Option<String>,
}

impl AppState {
    /// Opens the ledger at `data_path` and wires a controller around it. Expired deadlines are
    /// delivered on the returned receiver.
    pub async fn build(
        config: &ServiceConfig,
        data_path: &Path,
        crash: RngCrashSource<StdRng>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<Deadline>)> {
        let ledger = JsonLedger::open(data_path)
            .await
            .with_context(|| format!("failed to open ledger at {}", data_path.display()))?;
        let (sender, _) = broadcast::channel::<OutboundEvent>(config.event_buffer);
        let presenter = BroadcastPresenter::new(sender, config.phases);
        let (scheduler, deadlines) = TokioScheduler::new();
        let controller = Arc::new(Controller::new(
            config.phases,
            Arc::new(ledger),
            presenter.clone(),
            Arc::new(scheduler),
            crash,
        ));
        Ok((
            Self {
                controller,
                presenter,
                admin_token: config.admin_token.clone(),
            },
            deadlines,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/meltdown", post(start_session))
        .route("/meltdown/:id", get(get_session))
        .route("/interactions", post(interact))
        .route("/accounts/:id", get(get_account))
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub pot: u64,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    session: SessionId,
    join: String,
}

#[derive(Debug, Deserialize)]
pub struct InteractionRequest {
    pub custom_id: String,
    pub participant_id: ParticipantId,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum InteractionResponse {
    Accepted { result: Accepted, message: String },
    Rejected { reason: Rejection, message: String },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn error(status: StatusCode, code: &'static str, message: Option<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: code,
            message,
        }),
    )
        .into_response()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Accepts the token via `x-admin-token` or a Bearer authorization header.
fn admin_auth_error(expected: Option<&str>, headers: &HeaderMap) -> Option<StatusCode> {
    let expected = expected?;
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());
    if bearer == Some(expected) || header_token == Some(expected) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

async fn start_session(
    AxumState(state): AxumState<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> Response {
    if let Some(status) = admin_auth_error(state.admin_token.as_deref(), &headers) {
        warn!("rejected unauthorized meltdown start");
        return error(status, "unauthorized", None);
    }
    match state
        .controller
        .start(request.pot, request.channel, now_ms())
        .await
    {
        Ok(session) => (
            StatusCode::CREATED,
            Json(StartResponse {
                session,
                join: ActionId::new(ActionKind::Join, session).to_string(),
            }),
        )
            .into_response(),
        Err(err) => error(StatusCode::BAD_REQUEST, "invalid_pot", Some(err.to_string())),
    }
}

async fn get_session(
    AxumState(state): AxumState<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> Response {
    match state.controller.snapshot(SessionId(id)).await {
        Some(session) => Json(session).into_response(),
        None => error(StatusCode::NOT_FOUND, Rejection::SessionNotFound.code(), None),
    }
}

async fn get_account(
    AxumState(state): AxumState<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> Response {
    match state.controller.ledger().account(ParticipantId(id)).await {
        Ok(account) => Json(account).into_response(),
        Err(err) => {
            warn!(participant = id, ?err, "account lookup failed");
            error(
                StatusCode::SERVICE_UNAVAILABLE,
                Rejection::LedgerUnavailable.code(),
                None,
            )
        }
    }
}

/// Outcome of one button press, shared by the HTTP and WebSocket surfaces.
enum Interaction {
    Done(Result<Accepted, Rejection>),
    Malformed(String),
}

async fn dispatch(state: &AppState, custom_id: &str, participant: ParticipantId) -> Interaction {
    let action = match custom_id.parse::<ActionId>() {
        Ok(action) => action,
        Err(err) => {
            debug!(custom_id, ?err, "malformed action id");
            return Interaction::Malformed(err.to_string());
        }
    };
    let result = state
        .controller
        .submit(action.session, participant, action.kind)
        .await;
    if let Err(reason) = &result {
        debug!(
            session = %action.session,
            participant = %participant,
            action = %action.kind,
            reason = reason.code(),
            "action rejected"
        );
    }
    Interaction::Done(result)
}

fn rejection_status(reason: Rejection) -> StatusCode {
    match reason {
        Rejection::SessionNotFound => StatusCode::NOT_FOUND,
        Rejection::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        Rejection::WrongPhase
        | Rejection::NotAParticipant
        | Rejection::AlreadyActed
        | Rejection::NotEligible
        | Rejection::InsufficientFunds => StatusCode::CONFLICT,
    }
}

async fn interact(
    AxumState(state): AxumState<AppState>,
    Json(request): Json<InteractionRequest>,
) -> Response {
    match dispatch(&state, &request.custom_id, request.participant_id).await {
        Interaction::Done(Ok(result)) => Json(InteractionResponse::Accepted {
            message: result.to_string(),
            result,
        })
        .into_response(),
        Interaction::Done(Err(reason)) => (
            rejection_status(reason),
            Json(InteractionResponse::Rejected {
                message: reason.to_string(),
                reason,
            }),
        )
            .into_response(),
        Interaction::Malformed(message) => {
            error(StatusCode::BAD_REQUEST, "invalid_action", Some(message))
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Interaction {
        request_id: String,
        custom_id: String,
        participant_id: ParticipantId,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundResponse {
    Ack {
        request_id: String,
        result: Accepted,
        message: String,
    },
    Error {
        request_id: String,
        code: String,
        message: String,
    },
}

async fn ws_handler(ws: WebSocketUpgrade, AxumState(state): AxumState<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut events = state.presenter.subscribe();
    info!("status subscriber connected");

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let broadcast_task = {
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Ok(payload) = serde_json::to_string(&event) {
                            if tx.send(Message::Text(payload)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "status subscriber lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => handle_inbound(inbound, &state, &tx).await,
                Err(err) => warn!(?err, "invalid inbound message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    write_task.abort();
    broadcast_task.abort();
    info!("status subscriber disconnected");
}

async fn handle_inbound(
    inbound: InboundMessage,
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let InboundMessage::Interaction {
        request_id,
        custom_id,
        participant_id,
    } = inbound;
    let response = match dispatch(state, &custom_id, participant_id).await {
        Interaction::Done(Ok(result)) => OutboundResponse::Ack {
            request_id,
            message: result.to_string(),
            result,
        },
        Interaction::Done(Err(reason)) => OutboundResponse::Error {
            request_id,
            code: reason.code().to_string(),
            message: reason.to_string(),
        },
        Interaction::Malformed(message) => OutboundResponse::Error {
            request_id,
            code: "invalid_action".to_string(),
            message,
        },
    };
    if let Ok(payload) = serde_json::to_string(&response) {
        let _ = tx.send(Message::Text(payload));
    }
}
