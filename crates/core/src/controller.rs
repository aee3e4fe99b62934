//! Turn Controller
//!
//! Drives one user turn of a session: the model is called with the session
//! history, the system instructions and the tool catalog until it produces a
//! structured exercise of the kind the session's difficulty requires.
//!
//! Two budgets bound a turn. The step budget limits model round-trips within
//! one attempt; the retry budget limits how many times a failed attempt is
//! followed by a corrective reprompt. Tool failures never consume either
//! budget beyond the round-trip that requested them.

use crate::exercise::{OutputVariant, parse_output};
use crate::llm_client::{LLMAction, LLMClient, ToolCall, to_request_messages};
use crate::prompts::{FORMAT_CORRECTION, PromptSet, SYSTEM_PROMPT};
use crate::session::{AttemptFailure, Message, Session, SessionStatus, ToolCallRecord};
use crate::tools::ToolRegistry;
use anyhow::Result;
use async_openai::types::{
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType, FunctionObjectArgs,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, instrument, warn};

/// Why a turn ended without an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalFailure {
    #[error(
        "Could not produce a valid exercise after {retries} retries (last problem: {last_failure})"
    )]
    BudgetExceeded { retries: u32, last_failure: String },
    #[error("Could not prepare the model instructions: {message}")]
    Instructions { message: String },
}

impl TerminalFailure {
    fn instructions(e: anyhow::Error) -> Self {
        TerminalFailure::Instructions {
            message: format!("{:#}", e),
        }
    }
}

pub struct TurnController {
    llm: Arc<dyn LLMClient>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<PromptSet>,
}

impl TurnController {
    pub fn new(llm: Arc<dyn LLMClient>, tools: Arc<ToolRegistry>, prompts: Arc<PromptSet>) -> Self {
        Self { llm, tools, prompts }
    }

    /// Runs one user turn.
    ///
    /// Without `user_input` the session's request is sent as the opening
    /// message. A session that already failed returns its failure again
    /// without calling the model.
    #[instrument(
        name = "turn",
        skip_all,
        fields(session_id = %session.id, difficulty = %session.request.difficulty)
    )]
    pub async fn advance(
        &self,
        session: &mut Session,
        user_input: Option<&str>,
    ) -> Result<OutputVariant, TerminalFailure> {
        if session.status() == SessionStatus::Failed {
            if let Some(failure) = session.failure() {
                return Err(failure.clone());
            }
        }

        let system_prompt = self
            .system_prompt(session)
            .map_err(TerminalFailure::instructions)?;
        let tools = self
            .tool_definitions()
            .map_err(TerminalFailure::instructions)?;

        let input = match user_input.map(str::trim).filter(|text| !text.is_empty()) {
            Some(text) => text.to_string(),
            None => session.request.bootstrap_message(),
        };
        session.push(Message::user(input));
        session.begin_turn();

        loop {
            let failure = match self.attempt(session, &system_prompt, &tools).await {
                Ok(variant) => {
                    session.status = SessionStatus::Done;
                    info!(
                        kind = %variant.kind(),
                        steps = session.step_count(),
                        retries = session.retry_count(),
                        "Turn completed"
                    );
                    return Ok(variant);
                }
                Err(failure) => failure,
            };

            warn!(retry = session.retry_count(), %failure, "Attempt failed");
            session.attempt_failures.push(failure.clone());

            if session.retry_count() >= session.budgets.retry_budget {
                let terminal = TerminalFailure::BudgetExceeded {
                    retries: session.retry_count(),
                    last_failure: failure.to_string(),
                };
                error!(%terminal, "Retry budget exhausted");
                session.fail(terminal.clone());
                return Err(terminal);
            }

            let correction = self
                .prompts
                .render(
                    FORMAT_CORRECTION,
                    &[
                        ("problem", failure.to_string().as_str()),
                        ("expected_kind", session.request.difficulty.expected_kind().as_str()),
                    ],
                )
                .map_err(TerminalFailure::instructions)?;
            session.retry_count += 1;
            session.step_count = 0;
            session.status = SessionStatus::RetryPrompt;
            info!(retry = session.retry_count(), "Reprompting with format correction");
            session.push(Message::user(correction));
        }
    }

    /// Clears the session so the next `advance` starts a new exercise.
    pub fn reset(&self, session: &mut Session) {
        info!(session_id = %session.id, "Resetting session");
        session.reset();
    }

    async fn attempt(
        &self,
        session: &mut Session,
        system_prompt: &str,
        tools: &[ChatCompletionTool],
    ) -> Result<OutputVariant, AttemptFailure> {
        session.status = SessionStatus::Generating;
        loop {
            if session.step_count() >= session.budgets.step_budget {
                return Err(AttemptFailure::StepBudgetExhausted {
                    steps: session.step_count(),
                });
            }
            session.step_count += 1;

            let span = info_span!(
                "round",
                step = session.step_count(),
                retry = session.retry_count()
            );
            let history = to_request_messages(session.history()).map_err(|e| {
                AttemptFailure::CompletionError {
                    message: format!("{:#}", e),
                }
            })?;
            let action = self
                .llm
                .decide_action(system_prompt.to_string(), history, tools.to_vec())
                .instrument(span)
                .await
                .map_err(|e| AttemptFailure::CompletionError {
                    message: format!("{:#}", e),
                })?;

            match action {
                LLMAction::ToolCall(calls) => self.run_tools(session, calls).await,
                LLMAction::TextResponse(text) => {
                    let parsed = parse_output(&text, session.request.difficulty);
                    session.push(Message::assistant(text));
                    return parsed.map_err(|e| AttemptFailure::MalformedOutput {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn run_tools(&self, session: &mut Session, calls: Vec<ToolCall>) {
        let records: Vec<ToolCallRecord> = calls
            .into_iter()
            .map(|call| ToolCallRecord {
                id: call.id,
                arguments: parse_arguments(&call.function.arguments),
                name: call.function.name,
            })
            .collect();
        info!(
            tools = ?records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "Model requested tools"
        );
        session.push(Message::assistant_tool_calls(records.clone()));

        let batch: Vec<(String, Value)> = records
            .iter()
            .map(|r| (r.name.clone(), r.arguments.clone()))
            .collect();
        let results = self.tools.invoke_all(&batch).await;
        for (record, result) in records.into_iter().zip(results) {
            session.push(Message::tool(record.id, result));
        }
    }

    fn system_prompt(&self, session: &Session) -> Result<String> {
        let request = &session.request;
        let expected = request.difficulty.expected_kind();
        let difficulty = request.difficulty.to_string();
        let tool_descriptions = self.tools.describe_for_prompt();
        self.prompts.render(
            SYSTEM_PROMPT,
            &[
                ("topic", request.topic.as_str()),
                ("difficulty", difficulty.as_str()),
                ("target_language", request.target_language.as_str()),
                ("tool_descriptions", tool_descriptions.as_str()),
                ("expected_kind", expected.as_str()),
                ("output_contract", expected.contract_example()),
            ],
        )
    }

    fn tool_definitions(&self) -> Result<Vec<ChatCompletionTool>> {
        self.tools
            .catalog()
            .into_iter()
            .map(|t| {
                Ok(ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(
                        FunctionObjectArgs::default()
                            .name(t.name)
                            .description(t.description)
                            .parameters(t.input_schema)
                            .build()?,
                    )
                    .build()?)
            })
            .collect()
    }
}

/// Model-supplied arguments that are not JSON are kept as a string so the
/// registry rejects them as invalid.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
