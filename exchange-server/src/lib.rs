use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use exchange_core::{ExchangeError, GiftDraft, GiftSubmission, Room};
use futures::{SinkExt, StreamExt};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod config;
pub mod host;
pub mod store;

pub use config::{ConfigError, ServerConfig};
pub use host::SessionHost;
pub use store::{watch_room, MemoryStore, RoomSubscription, SessionStore, SubscriptionHandle};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn SessionStore>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let store = match &config.persist_path {
        Some(path) => MemoryStore::with_persistence(path.clone(), config.channel_capacity).await,
        None => MemoryStore::new(config.channel_capacity),
    };
    let app = app(AppState::new(Arc::new(store)));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("gift exchange server listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/room", post(create_room))
        .route("/room/:id", get(get_room))
        .route("/room/:id/join", post(join_room))
        .route("/room/:id/gift", post(submit_gift))
        .route("/room/:id/exchange", post(begin_exchange))
        .route("/room/:id/advance", post(advance))
        .route("/ws/:id", get(ws_handler))
        .with_state(state)
}

/// Maps core failures onto HTTP statuses; the body is the error message.
#[derive(Debug)]
pub struct ApiError(pub ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ExchangeError::RoomNotFound | ExchangeError::ParticipantNotFound => {
                StatusCode::NOT_FOUND
            }
            ExchangeError::InvalidInput(_) | ExchangeError::InsufficientParticipants => {
                StatusCode::BAD_REQUEST
            }
            ExchangeError::NotHost => StatusCode::FORBIDDEN,
            ExchangeError::DuplicateSubmission
            | ExchangeError::AlreadyStarted
            | ExchangeError::NotReady(_)
            | ExchangeError::NotInExchange
            | ExchangeError::CursorOutOfOrder { .. }
            | ExchangeError::CursorOutOfRange { .. } => StatusCode::CONFLICT,
            ExchangeError::DerangementUnobtainable | ExchangeError::StoreWriteFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ExchangeError::InvalidAssignments(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(retryable = self.0.is_retryable(), "request failed: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    host_name: String,
}

#[derive(Serialize)]
struct CreateRoomResponse {
    room_id: String,
    participant_id: String,
}

#[derive(Deserialize)]
struct JoinRequest {
    name: String,
}

#[derive(Serialize)]
struct JoinResponse {
    participant_id: String,
}

#[derive(Deserialize)]
struct GiftRequest {
    participant_id: String,
    title: String,
    #[serde(default)]
    reason: String,
    recommendation: Option<String>,
}

#[derive(Serialize)]
struct GiftResponse {
    gift: GiftSubmission,
}

#[derive(Deserialize)]
struct HostRequest {
    participant_id: String,
}

#[derive(Deserialize)]
struct StartParams {
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct AdvanceRequest {
    participant_id: String,
    from: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    State(Room),
}

async fn create_room(
    State(state): State<AppState>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (room_id, participant_id) = state.store.create_room(&payload.host_name).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id,
            participant_id,
        }),
    ))
}

async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Room>, ApiError> {
    Ok(Json(state.store.room(&room_id).await?))
}

async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let participant_id = state.store.add_participant(&room_id, &payload.name).await?;
    Ok(Json(JoinResponse { participant_id }))
}

async fn submit_gift(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<GiftRequest>,
) -> Result<Json<GiftResponse>, ApiError> {
    let draft = GiftDraft {
        title: payload.title,
        reason: payload.reason,
        recommendation: payload.recommendation,
    };
    let gift = state
        .store
        .submit_gift(&room_id, &payload.participant_id, draft)
        .await?;
    Ok(Json(GiftResponse { gift }))
}

async fn begin_exchange(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<StartParams>,
    Json(payload): Json<HostRequest>,
) -> Result<Json<Room>, ApiError> {
    let host = SessionHost::attach(state.store.clone(), &room_id, &payload.participant_id).await?;
    let mut rng = params
        .seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);
    Ok(Json(host.begin_exchange(&mut rng).await?))
}

async fn advance(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<Room>, ApiError> {
    let host = SessionHost::attach(state.store.clone(), &room_id, &payload.participant_id).await?;
    Ok(Json(host.advance_from(payload.from).await?))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Response, ApiError> {
    let subscription = state.store.subscribe(&room_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription, room_id)))
}

async fn handle_socket(stream: WebSocket, mut subscription: RoomSubscription, room_id: String) {
    let (mut sender, mut receiver) = stream.split();
    debug!(room_id = %room_id, "websocket attached");

    // Forward snapshots until the client goes away.
    let mut send_task = tokio::spawn(async move {
        while let Some(room) = subscription.next().await {
            let text = match serde_json::to_string(&ServerMessage::State(room)) {
                Ok(text) => text,
                Err(err) => {
                    warn!("snapshot encode error: {err}");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; anything they send is ignored until close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!(room_id = %room_id, "websocket detached");
}
