//! API Models
//!
//! Request and response bodies of the REST API. Core types without a
//! `ToSchema` implementation are documented as opaque objects.

use chrono::{DateTime, Utc};
use parlare_core::{
    dispatcher::RenderableResult,
    exercise::Difficulty,
    session::{AttemptFailure, Message, Session, SessionAssets, SessionStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionPayload {
    #[schema(example = "Ordering coffee")]
    pub topic: String,
    #[schema(value_type = String, example = "easy")]
    pub difficulty: Difficulty,
    /// Defaults to the server's configured target language.
    #[schema(example = "Italian")]
    #[serde(default)]
    pub target_language: Option<String>,
    #[schema(example = "I am travelling to Rome next week")]
    #[serde(default)]
    pub user_context: Option<String>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct TurnPayload {
    /// The learner's message. Omit it to start the exercise from the session request.
    #[schema(example = "Can you make it about espresso?")]
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub topic: String,
    #[schema(value_type = String, example = "easy")]
    pub difficulty: Difficulty,
    pub target_language: String,
    #[schema(value_type = String, example = "awaiting_request")]
    pub status: SessionStatus,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            topic: session.request.topic.clone(),
            difficulty: session.request.difficulty,
            target_language: session.request.target_language.clone(),
            status: session.status(),
            message_count: session.history().len(),
            created_at: session.created_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SessionDetail {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub topic: String,
    #[schema(value_type = String, example = "medium")]
    pub difficulty: Difficulty,
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<String>,
    #[schema(value_type = String, example = "done")]
    pub status: SessionStatus,
    pub step_count: u32,
    pub retry_count: u32,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<Message>,
    #[schema(value_type = Vec<Object>)]
    pub attempt_failures: Vec<AttemptFailure>,
    #[schema(value_type = Object)]
    pub assets: SessionAssets,
    /// The terminal failure message, for sessions in the `failed` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionDetail {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            topic: session.request.topic.clone(),
            difficulty: session.request.difficulty,
            target_language: session.request.target_language.clone(),
            user_context: session.request.user_context.clone(),
            status: session.status(),
            step_count: session.step_count(),
            retry_count: session.retry_count(),
            history: session.history().to_vec(),
            attempt_failures: session.attempt_failures().to_vec(),
            assets: session.assets().clone(),
            failure: session.failure().map(ToString::to_string),
            created_at: session.created_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct TurnResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, example = "done")]
    pub status: SessionStatus,
    pub retry_count: u32,
    /// The text shown to the learner.
    pub response_to_user: String,
    /// The exercise with its asset paths, quiz items and notices.
    #[schema(value_type = Object)]
    pub result: RenderableResult,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ToolInfo {
    #[schema(example = "search_exercises")]
    pub name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub input_schema: Value,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AssetQuery {
    /// A stored asset path, e.g. `file://parlare-assets/images/cafe_1a2b3c4d5e6f.png`.
    pub path: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
