//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for exercise
//! sessions, the tool catalog and stored assets. It uses `utoipa` doc
//! comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use parlare_core::{
    exercise::ExerciseRequest,
    session::{Session, SessionStatus},
    storage::StorageError,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        AssetQuery, CreateSessionPayload, ErrorResponse, SessionDetail, SessionSummary, ToolInfo,
        TurnPayload, TurnResponse,
    },
    state::{AppState, SessionHandle},
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The turn ended without a valid exercise.
    Unprocessable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unprocessable(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse { message }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<SessionHandle>, ApiError> {
    state
        .session(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))
}

/// Create a new exercise session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = SessionSummary),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let topic = payload.topic.trim();
    if topic.is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".to_string()));
    }
    let target_language = payload
        .target_language
        .as_deref()
        .map(str::trim)
        .filter(|language| !language.is_empty())
        .unwrap_or(state.defaults.target_language.as_str());

    let mut request = ExerciseRequest::new(topic, payload.difficulty, target_language);
    request.user_context = payload
        .user_context
        .filter(|context| !context.trim().is_empty());

    let session = Session::new(request, state.defaults.budgets);
    let summary = SessionSummary::from(&session);
    info!(
        session_id = %session.id,
        topic = %topic,
        difficulty = %payload.difficulty,
        "Created session"
    );

    state
        .sessions
        .write()
        .await
        .insert(session.id, Arc::new(SessionHandle::new(session)));

    Ok((StatusCode::CREATED, Json(summary)))
}

/// List all sessions, oldest first.
///
/// Sessions with a turn in progress are reported as `generating`.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [SessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let mut summaries: Vec<SessionSummary> = state
        .sessions
        .read()
        .await
        .values()
        .map(|handle| {
            handle.view(|session, busy| {
                let mut summary = SessionSummary::from(session);
                if busy {
                    summary.status = SessionStatus::Generating;
                }
                summary
            })
        })
        .collect();
    summaries.sort_by_key(|summary| summary.created_at);
    Json(summaries)
}

/// Get a session with its full history.
///
/// While a turn is in progress the history ends before that turn.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionDetail),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
    let handle = find_session(&state, id).await?;
    Ok(Json(handle.view(|session, busy| {
        let mut detail = SessionDetail::from(session);
        if busy {
            detail.status = SessionStatus::Generating;
        }
        detail
    })))
}

/// Run one turn: generate the next exercise and its media.
///
/// Without `text` the session's request starts the exercise.
#[utoipa::path(
    post,
    path = "/sessions/{id}/turns",
    request_body = TurnPayload,
    responses(
        (status = 200, description = "The generated exercise", body = TurnResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 422, description = "No valid exercise could be produced", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn run_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TurnPayload>,
) -> Result<Json<TurnResponse>, ApiError> {
    let handle = find_session(&state, id).await?;
    let mut session = handle.lock().await;

    let variant = state
        .controller
        .advance(&mut session, payload.text.as_deref())
        .await
        .map_err(|failure| {
            warn!(session_id = %id, %failure, "Turn failed");
            ApiError::Unprocessable(failure.to_string())
        })?;
    let result = state.dispatcher.dispatch(&mut session, variant).await;

    Ok(Json(TurnResponse {
        session_id: id,
        status: session.status(),
        retry_count: session.retry_count(),
        response_to_user: result.response_to_user().to_string(),
        result,
    }))
}

/// Discard the current exercise so the session can start a new one.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reset",
    responses(
        (status = 200, description = "Session reset", body = SessionSummary),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    let handle = find_session(&state, id).await?;
    let mut session = handle.lock().await;
    state.controller.reset(&mut session);
    Ok(Json(SessionSummary::from(&*session)))
}

/// Delete a session.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(session_id = %id, "Deleted session");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(format!("Session with id '{}' not found", id))),
    }
}

/// List the tools the model may call.
#[utoipa::path(
    get,
    path = "/tools",
    responses(
        (status = 200, description = "Tool catalog", body = [ToolInfo])
    )
)]
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    Json(
        state
            .tools
            .catalog()
            .into_iter()
            .map(|tool| ToolInfo {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            })
            .collect(),
    )
}

/// Download a generated image or audio file.
#[utoipa::path(
    get,
    path = "/assets",
    params(AssetQuery),
    responses(
        (
            status = 200,
            description = "Asset bytes",
            body = Vec<u8>,
            content_type = "application/octet-stream"
        ),
        (status = 400, description = "Invalid asset path", body = ErrorResponse),
        (status = 404, description = "Asset not found", body = ErrorResponse)
    )
)]
pub async fn get_asset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
) -> Result<Response, ApiError> {
    let data = state.assets.fetch(&query.path).await.map_err(|err| {
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::NotFound(_)) => ApiError::NotFound(err.to_string()),
            Some(_) => ApiError::BadRequest(err.to_string()),
            None => ApiError::InternalServerError(err),
        }
    })?;
    Ok(([(header::CONTENT_TYPE, content_type(&query.path))], data).into_response())
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type("file://b/images/cafe_0123456789ab.png"), "image/png");
        assert_eq!(content_type("file://b/audio/dialogue_0123456789ab.MP3"), "audio/mpeg");
        assert_eq!(content_type("file://b/misc/notes"), "application/octet-stream");
    }
}
