//! Session State
//!
//! A `Session` is one exercise conversation. It is passed explicitly into the
//! turn controller and the dispatcher, which are the only components that
//! mutate it.

use crate::assets::Asset;
use crate::controller::TerminalFailure;
use crate::exercise::ExerciseRequest;
use crate::tools::ToolResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The structured result for `Tool` messages; `content` is its serialized form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into())
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCallRecord>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(MessageRole::Assistant, String::new())
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, result: ToolResult) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            content: result.to_content(),
            tool_result: Some(result),
            ..Self::new(MessageRole::Tool, String::new())
        }
    }
}

/// Where a session is in the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingRequest,
    Generating,
    RetryPrompt,
    Done,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::AwaitingRequest => "awaiting_request",
            SessionStatus::Generating => "generating",
            SessionStatus::RetryPrompt => "retry_prompt",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why an attempt ended without a usable exercise.
///
/// Tool failures are never recorded here; they live in the tool messages of
/// the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AttemptFailure {
    MalformedOutput { message: String },
    StepBudgetExhausted { steps: u32 },
    CompletionError { message: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::MalformedOutput { message } => {
                write!(f, "malformed output: {}", message)
            }
            AttemptFailure::StepBudgetExhausted { steps } => {
                write!(f, "no final answer after {} model round-trips", steps)
            }
            AttemptFailure::CompletionError { message } => {
                write!(f, "completion service error: {}", message)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    /// Model round-trips allowed per attempt.
    pub step_budget: u32,
    /// Corrective reprompts allowed per user turn.
    pub retry_budget: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            step_budget: 8,
            retry_budget: 3,
        }
    }
}

/// Assets generated for the current exercise. Each kind is generated at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionAssets {
    pub image: Option<Asset>,
    pub audio: Option<Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub request: ExerciseRequest,
    pub budgets: Budgets,
    pub(crate) status: SessionStatus,
    pub(crate) history: Vec<Message>,
    pub(crate) step_count: u32,
    pub(crate) retry_count: u32,
    pub(crate) attempt_failures: Vec<AttemptFailure>,
    pub(crate) assets: SessionAssets,
    pub(crate) failure: Option<TerminalFailure>,
}

impl Session {
    pub fn new(request: ExerciseRequest, budgets: Budgets) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            request,
            budgets,
            status: SessionStatus::AwaitingRequest,
            history: Vec::new(),
            step_count: 0,
            retry_count: 0,
            attempt_failures: Vec::new(),
            assets: SessionAssets::default(),
            failure: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The full conversation, including tool calls and tool results.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn attempt_failures(&self) -> &[AttemptFailure] {
        &self.attempt_failures
    }

    pub fn assets(&self) -> &SessionAssets {
        &self.assets
    }

    pub fn failure(&self) -> Option<&TerminalFailure> {
        self.failure.as_ref()
    }

    /// Discards the current exercise so the same session can start a new one.
    ///
    /// The request, including its difficulty, is kept.
    pub fn reset(&mut self) {
        self.status = SessionStatus::AwaitingRequest;
        self.history.clear();
        self.step_count = 0;
        self.retry_count = 0;
        self.attempt_failures.clear();
        self.assets = SessionAssets::default();
        self.failure = None;
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub(crate) fn begin_turn(&mut self) {
        self.step_count = 0;
        self.retry_count = 0;
        self.status = SessionStatus::Generating;
    }

    pub(crate) fn fail(&mut self, failure: TerminalFailure) {
        self.status = SessionStatus::Failed;
        self.failure = Some(failure);
    }
}
