use crate::session::{Message, MessageRole};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, FunctionCall,
    },
};
use async_trait::async_trait;

/// Represents a tool call requested by the LLM.
pub type ToolCall = ChatCompletionMessageToolCall;

/// Represents the two possible outcomes of one model round-trip.
#[derive(Debug, Clone)]
pub enum LLMAction {
    /// The LLM decided to respond directly with text.
    TextResponse(String),
    /// The LLM decided to call one or more tools.
    ToolCall(Vec<ToolCall>),
}

/// A generic client for interacting with an LLM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call to the LLM to decide on the next action.
    async fn decide_action(
        &self,
        system_prompt: String,
        history: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction>;

    /// Makes a single tool-less completion for one prompt.
    async fn complete(&self, system_prompt: String, prompt: String) -> Result<String>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    async fn create(
        &self,
        system_prompt: String,
        history: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<CreateChatCompletionResponse> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
        );
        messages.extend(history);

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(messages);
        if let Some(temperature) = self.temperature {
            request.temperature(temperature);
        }
        if !tools.is_empty() {
            request.tools(tools).tool_choice("auto");
        }
        Ok(self.client.chat().create(request.build()?).await?)
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        system_prompt: String,
        history: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction> {
        let response = self.create(system_prompt, history, tools).await?;
        let choice = response
            .choices
            .first()
            .context("LLM response contained no choices")?;

        match (&choice.message.tool_calls, &choice.message.content) {
            (Some(tool_calls), _) if !tool_calls.is_empty() => {
                Ok(LLMAction::ToolCall(tool_calls.clone()))
            }
            (_, Some(content)) => Ok(LLMAction::TextResponse(content.clone())),
            _ => Err(anyhow!(
                "LLM response had neither text content nor tool calls."
            )),
        }
    }

    async fn complete(&self, system_prompt: String, prompt: String) -> Result<String> {
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?
            .into();
        let response = self.create(system_prompt, vec![user], Vec::new()).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .context("LLM completion returned no text")
    }
}

/// Converts session history into chat completion request messages.
pub fn to_request_messages(history: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>> {
    history
        .iter()
        .map(|message| {
            let converted: ChatCompletionRequestMessage = match message.role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into(),
                MessageRole::Assistant if !message.tool_calls.is_empty() => {
                    let tool_calls: Vec<ChatCompletionMessageToolCall> = message
                        .tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect();
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(tool_calls)
                        .build()?
                        .into()
                }
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into(),
                MessageRole::Tool => ChatCompletionRequestToolMessageArgs::default()
                    .content(message.content.clone())
                    .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
                    .build()?
                    .into(),
            };
            Ok(converted)
        })
        .collect()
}
