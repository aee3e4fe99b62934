//! Tool Registry
//!
//! Tools are async functions taking a typed argument struct. The struct's
//! `schemars` schema is the tool's input contract and its doc comment is the
//! description advertised to the model. `invoke` never fails: unknown tools,
//! invalid arguments, returned errors and panics all become an error
//! [`ToolResult`].

pub mod builtin;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidArguments,
    ExecutionFailed,
}

/// The outcome of one tool call, as recorded in the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { payload: Value },
    Error { kind: ToolErrorKind, message: String },
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        ToolResult::Success { payload }
    }

    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        ToolResult::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }

    /// The text handed back to the model as the tool turn's content.
    pub fn to_content(&self) -> String {
        match self {
            ToolResult::Success { payload: Value::String(s) } => s.clone(),
            ToolResult::Success { payload } => payload.to_string(),
            ToolResult::Error { message, .. } => message.clone(),
        }
    }
}

/// A tool as advertised to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

type ToolHandler =
    Arc<dyn Fn(Value) -> Result<BoxFuture<'static, anyhow::Result<Value>>, String> + Send + Sync>;

struct RegisteredTool {
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

/// Maps tool names to their handlers and input contracts.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    pool: Arc<Semaphore>,
}

impl ToolRegistry {
    /// Creates an empty registry that runs at most `max_concurrency` tools at once.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            tools: BTreeMap::new(),
            pool: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Registers `handler` under `name`, replacing any tool with the same name.
    pub fn register<A, F, Fut, T>(&mut self, name: &str, handler: F)
    where
        A: DeserializeOwned + JsonSchema + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let mut input_schema = schemars::schema_for!(A).to_value();
        if let Some(obj) = input_schema.as_object_mut() {
            obj.remove("$schema");
        }
        let description = input_schema
            .get("description")
            .and_then(Value::as_str)
            .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| "No description available.".to_string());

        let erased: ToolHandler = Arc::new(
            move |raw: Value| -> Result<BoxFuture<'static, anyhow::Result<Value>>, String> {
                let args: A = serde_json::from_value(raw).map_err(|e| e.to_string())?;
                let fut = handler(args);
                Ok(async move {
                    let output = fut.await?;
                    Ok::<Value, anyhow::Error>(serde_json::to_value(output)?)
                }
                .boxed())
            },
        );

        if self.tools.contains_key(name) {
            warn!(tool = %name, "Replacing already registered tool");
        }
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                description,
                input_schema,
                handler: erased,
            },
        );
    }

    /// Validates `raw_args` and runs the named tool.
    pub async fn invoke(&self, name: &str, raw_args: Value) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            return ToolResult::error(
                ToolErrorKind::UnknownTool,
                format!("Error: Tool '{}' not found.", name),
            );
        };

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (tool.handler)(raw_args))) {
            Ok(Ok(future)) => future,
            Ok(Err(reason)) => {
                warn!(tool = %name, %reason, "Rejected tool arguments");
                return ToolResult::error(
                    ToolErrorKind::InvalidArguments,
                    format!("Error: invalid arguments for tool '{}': {}", name, reason),
                );
            }
            Err(panic) => return Self::panicked(name, panic),
        };

        let _permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ToolResult::error(
                    ToolErrorKind::ExecutionFailed,
                    format!("Error in tool {}: {}", name, e),
                );
            }
        };

        info!(tool = %name, "Executing tool");
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(payload)) => ToolResult::success(payload),
            Ok(Err(e)) => {
                error!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::error(
                    ToolErrorKind::ExecutionFailed,
                    format!("Error in tool {}: {}", name, e),
                )
            }
            Err(panic) => Self::panicked(name, panic),
        }
    }

    /// Runs a batch of calls concurrently on the worker pool.
    ///
    /// Results are returned in the order of `calls`.
    pub async fn invoke_all(&self, calls: &[(String, Value)]) -> Vec<ToolResult> {
        join_all(
            calls
                .iter()
                .map(|(name, args)| self.invoke(name, args.clone())),
        )
        .await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Name to description pairs, ordered by name.
    pub fn list(&self) -> BTreeMap<String, String> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description.clone()))
            .collect()
    }

    /// The full catalog, including each tool's JSON schema.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolDescriptor {
                name: name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            })
            .collect()
    }

    /// One `- name: description` line per tool, for the system prompt.
    pub fn describe_for_prompt(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available.".to_string();
        }
        self.tools
            .iter()
            .map(|(name, tool)| format!("- {}: {}", name, tool.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn panicked(name: &str, panic: Box<dyn Any + Send>) -> ToolResult {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(tool = %name, %reason, "Tool panicked");
        ToolResult::error(
            ToolErrorKind::ExecutionFailed,
            format!("Error in tool {}: panicked: {}", name, reason),
        )
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Adds two numbers.
    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Empty {}

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new(2);
        registry.register("add", |args: AddArgs| async move { Ok(args.a + args.b) });
        registry.register("fail", |_: Empty| async move {
            Err::<(), _>(anyhow!("service unavailable"))
        });
        registry.register("explode", |_: Empty| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        registry
    }

    #[tokio::test]
    async fn invokes_tool_with_valid_arguments() {
        let result = registry().invoke("add", json!({"a": 2, "b": 3})).await;
        assert_eq!(result, ToolResult::success(json!(5)));
        assert_eq!(result.to_content(), "5");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let result = registry().invoke("nonexistent_tool", json!({})).await;
        assert!(result.is_error());
        assert_eq!(result.to_content(), "Error: Tool 'nonexistent_tool' not found.");
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = ToolRegistry::new(1);
        registry.register("add", move |args: AddArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(args.a + args.b) }
        });

        let result = registry.invoke("add", json!({"a": "two"})).await;
        match result {
            ToolResult::Error { kind, .. } => assert_eq!(kind, ToolErrorKind::InvalidArguments),
            other => panic!("expected an error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_contained() {
        let registry = registry();

        let failed = registry.invoke("fail", json!({})).await;
        assert_eq!(failed.to_content(), "Error in tool fail: service unavailable");

        let panicked = registry.invoke("explode", json!({})).await;
        match panicked {
            ToolResult::Error { kind, message } => {
                assert_eq!(kind, ToolErrorKind::ExecutionFailed);
                assert!(message.contains("kaboom"));
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invoke_all_keeps_request_order_and_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new(2);
        {
            let running = running.clone();
            let peak = peak.clone();
            registry.register("slow_add", move |args: AddArgs| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(args.a + args.b)
                }
            });
        }

        let calls: Vec<(String, Value)> = (0..6)
            .map(|i| ("slow_add".to_string(), json!({"a": i, "b": 100})))
            .collect();
        let results = registry.invoke_all(&calls).await;

        let sums: Vec<Value> = results
            .into_iter()
            .map(|r| match r {
                ToolResult::Success { payload } => payload,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(sums, (0..6).map(|i| json!(i + 100)).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn listing_uses_contract_descriptions() {
        let registry = registry();
        let list = registry.list();
        assert_eq!(list["add"], "Adds two numbers.");
        assert_eq!(list["fail"], "No description available.");

        let catalog = registry.catalog();
        let add = catalog.iter().find(|t| t.name == "add").unwrap();
        assert_eq!(add.input_schema["type"], "object");
        assert!(add.input_schema["properties"].get("a").is_some());
        assert!(add.input_schema.get("$schema").is_none());

        assert!(registry.describe_for_prompt().contains("- add: Adds two numbers."));
    }
}
