//! API routes
//!
//! The UI layer for the chat session: every handler forwards to the
//! [`SessionHandle`](crate::core::SessionHandle) and renders the result.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conversation::{Turn, TurnId};
use crate::core::{Queued, SessionError};
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Order {
    #[default]
    Oldest,
    Newest,
}

#[derive(Debug, Deserialize)]
struct TurnsQuery {
    #[serde(default)]
    order: Order,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Speech recognizer output, best match first
#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    #[serde(default)]
    pub results: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Turn {0} not found")]
    NotFound(TurnId),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(SessionError::Store(e)) => {
                tracing::error!(error = %e, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn queued_response(queued: Option<Queued>) -> Response {
    match queued {
        Some(queued) => (StatusCode::ACCEPTED, Json(queued)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.config.llm.provider.clone(),
    })
}

async fn list_turns(
    State(state): State<AppState>,
    Query(query): Query<TurnsQuery>,
) -> Json<Vec<Turn>> {
    let mut turns = state.session.snapshot();
    if let Order::Newest = query.order {
        turns.reverse();
    }
    Json(turns)
}

async fn append(
    State(state): State<AppState>,
    Json(request): Json<TextRequest>,
) -> Result<Response, ApiError> {
    let queued = state.session.append(request.text).await?;
    Ok(queued_response(queued))
}

async fn voice(
    State(state): State<AppState>,
    Json(request): Json<VoiceRequest>,
) -> Result<Response, ApiError> {
    let recognized = request.results.into_iter().next();
    let queued = state.session.voice_input(recognized).await?;
    Ok(queued_response(queued))
}

async fn edit(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<TextRequest>,
) -> Result<Response, ApiError> {
    let target = TurnId(id);
    match state.session.edit(target, request.text).await? {
        Some(queued) => Ok(queued_response(Some(queued))),
        None => Err(ApiError::NotFound(target)),
    }
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let target = TurnId(id);
    if state.session.delete(target).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(target))
    }
}

async fn clear_history(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.session.clear_history().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.session.save().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/turns",
            get(list_turns).post(append).delete(clear_history),
        )
        .route("/v1/turns/:id", put(edit).delete(delete))
        .route("/v1/voice", post(voice))
        .route("/v1/session/save", post(save))
}
