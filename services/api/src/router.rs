//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CreateSessionPayload, ErrorResponse, SessionDetail, SessionSummary, ToolInfo, TurnPayload,
        TurnResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::run_turn,
        handlers::reset_session,
        handlers::delete_session,
        handlers::list_tools,
        handlers::get_asset,
    ),
    components(
        schemas(
            CreateSessionPayload,
            TurnPayload,
            SessionSummary,
            SessionDetail,
            TurnResponse,
            ToolInfo,
            ErrorResponse
        )
    ),
    tags(
        (
            name = "Parlare API",
            description = "Exercise sessions for the Parlare language-learning assistant"
        )
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/turns", post(handlers::run_turn))
        .route("/sessions/{id}/reset", post(handlers::reset_session))
        .route("/tools", get(handlers::list_tools))
        .route("/assets", get(handlers::get_asset))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Services, SessionDefaults};
    use anyhow::{Result, anyhow};
    use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use parlare_core::{
        assets::{ImageGenerator, SpeechSynthesizer},
        llm_client::{LLMAction, LLMClient},
        prompts::PromptSet,
        session::Budgets,
        storage::MemoryObjectStore,
        vector_store::{Embedder, ExerciseVectorStore},
        web_search::{SearchHit, WebSearch},
    };
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    const PNG_BYTES: &[u8] = b"\x89PNG fake image";

    /// Answers every model round-trip with the next scripted text, after `delay`.
    struct ScriptedLLM {
        answers: Mutex<VecDeque<String>>,
        delay: Duration,
    }

    impl ScriptedLLM {
        fn new(answers: Vec<String>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn decide_action(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
            _tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            tokio::time::sleep(self.delay).await;
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .map(LLMAction::TextResponse)
                .ok_or_else(|| anyhow!("no scripted answer left"))
        }

        async fn complete(&self, _system_prompt: String, _prompt: String) -> Result<String> {
            Err(anyhow!("not scripted"))
        }
    }

    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[derive(Default)]
    struct CountingImages {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageGenerator for CountingImages {
        async fn generate_image(&self, _description: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(STANDARD.encode(PNG_BYTES))
        }
    }

    struct NoSearch;

    #[async_trait]
    impl WebSearch for NoSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    struct SilentSpeech;

    #[async_trait]
    impl SpeechSynthesizer for SilentSpeech {
        async fn synthesize(&self, _text: &str) -> Result<String> {
            Err(anyhow!("speech is disabled in tests"))
        }
    }

    fn text_exercise() -> String {
        json!({
            "kind": "text_exercise",
            "exercise_type": "Translation Task",
            "difficulty": "easy",
            "response_to_user": "Traduci: 'I would like a coffee, please.'",
            "text_content": "Vorrei un caffè, per favore.",
            "original_topic": "Ordering coffee",
            "original_target_language": "Italian"
        })
        .to_string()
    }

    fn image_exercise() -> String {
        json!({
            "kind": "image_exercise",
            "exercise_type": "Picture Description",
            "difficulty": "medium",
            "response_to_user": "Descrivi cosa vedi nell'immagine.",
            "image_request": {
                "description": "A busy Italian café counter in the morning",
                "descriptive_filename": "cafe_counter"
            },
            "original_topic": "Ordering coffee",
            "original_target_language": "Italian"
        })
        .to_string()
    }

    fn test_app(answers: Vec<String>, budgets: Budgets) -> (Router, Arc<CountingImages>) {
        app_with(ScriptedLLM::new(answers), budgets)
    }

    fn app_with(llm: ScriptedLLM, budgets: Budgets) -> (Router, Arc<CountingImages>) {
        let images = Arc::new(CountingImages::default());
        let services = Services {
            llm: Arc::new(llm),
            images: images.clone(),
            speech: Arc::new(SilentSpeech),
            object_store: Arc::new(MemoryObjectStore::new("test-assets")),
            vector_store: Arc::new(ExerciseVectorStore::new(Arc::new(ConstantEmbedder))),
            web_search: Arc::new(NoSearch),
            prompts: Arc::new(PromptSet::builtin()),
        };
        let defaults = SessionDefaults {
            target_language: "Italian".to_string(),
            budgets,
            tool_concurrency: 2,
        };
        let state = Arc::new(AppState::new(services, defaults));
        (create_router(state), images)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn create(app: &Router, difficulty: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/sessions",
            Some(json!({"topic": "Ordering coffee", "difficulty": difficulty})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn start_turn(app: &Router, id: &str) -> (StatusCode, Value) {
        send(app, "POST", &format!("/sessions/{id}/turns"), Some(json!({}))).await
    }

    #[tokio::test]
    async fn test_create_and_list_sessions() {
        let (app, _) = test_app(vec![], Budgets::default());
        let id = create(&app, "easy").await;

        let (status, body) = send(&app, "GET", "/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], id);
        assert_eq!(body[0]["target_language"], "Italian");
        assert_eq!(body[0]["status"], "awaiting_request");
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_a_running_turn() {
        let llm = ScriptedLLM::new(vec![text_exercise()]).with_delay(Duration::from_secs(2));
        let (app, _) = app_with(llm, Budgets::default());
        let id = create(&app, "easy").await;

        let turn = {
            let app = app.clone();
            let id = id.clone();
            tokio::spawn(async move { start_turn(&app, &id).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (status, list) = tokio::time::timeout(
            Duration::from_secs(1),
            send(&app, "GET", "/sessions", None),
        )
        .await
        .expect("listing sessions waited for the turn");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["status"], "generating");

        let (status, detail) = tokio::time::timeout(
            Duration::from_secs(1),
            send(&app, "GET", &format!("/sessions/{id}"), None),
        )
        .await
        .expect("reading the session waited for the turn");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], "generating");
        assert!(detail["history"].as_array().unwrap().is_empty());

        let (status, body) = turn.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "done");

        let (_, detail) = send(&app, "GET", &format!("/sessions/{id}"), None).await;
        assert_eq!(detail["status"], "done");
        assert!(!detail["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_session_rejects_blank_topic() {
        let (app, _) = test_app(vec![], Budgets::default());
        let (status, body) = send(
            &app,
            "POST",
            "/sessions",
            Some(json!({"topic": "   ", "difficulty": "easy"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "topic must not be empty");
    }

    #[tokio::test]
    async fn test_turn_retries_malformed_output_then_succeeds() {
        let (app, _) = test_app(
            vec!["Here is your exercise!".to_string(), text_exercise()],
            Budgets::default(),
        );
        let id = create(&app, "easy").await;

        let (status, body) = start_turn(&app, &id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "done");
        assert_eq!(body["retry_count"], 1);
        assert_eq!(body["response_to_user"], "Traduci: 'I would like a coffee, please.'");
        assert_eq!(body["result"]["variant"]["kind"], "text_exercise");

        let (status, detail) = send(&app, "GET", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["attempt_failures"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_turn_budget_exhaustion_is_unprocessable() {
        let (app, _) = test_app(
            vec!["nope".to_string(), "still nope".to_string()],
            Budgets {
                step_budget: 2,
                retry_budget: 1,
            },
        );
        let id = create(&app, "easy").await;

        let (status, body) = start_turn(&app, &id).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Could not produce a valid exercise after 1 retries")
        );

        let (_, detail) = send(&app, "GET", &format!("/sessions/{id}"), None).await;
        assert_eq!(detail["status"], "failed");
        assert!(detail["failure"].is_string());
    }

    #[tokio::test]
    async fn test_image_is_generated_once_and_served() {
        let (app, images) = test_app(vec![image_exercise(), image_exercise()], Budgets::default());
        let id = create(&app, "medium").await;

        let (status, first) = start_turn(&app, &id).await;
        assert_eq!(status, StatusCode::OK);
        let path = first["result"]["image_path"].as_str().unwrap().to_string();
        assert!(path.starts_with("mem://test-assets/images/cafe_counter_"));

        let (status, second) = send(
            &app,
            "POST",
            &format!("/sessions/{id}/turns"),
            Some(json!({"text": "Un'altra, per favore"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["result"]["image_path"], path.as_str());
        assert_eq!(images.calls.load(Ordering::SeqCst), 1);

        let request = Request::builder()
            .uri(format!("/assets?path={path}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], PNG_BYTES);
    }

    #[tokio::test]
    async fn test_missing_asset_and_bad_path() {
        let (app, _) = test_app(vec![], Budgets::default());

        let missing = "/assets?path=mem://test-assets/images/none.png";
        let (status, _) = send(&app, "GET", missing, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/assets?path=not-a-path", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset_and_delete_session() {
        let (app, _) = test_app(vec![text_exercise()], Budgets::default());
        let id = create(&app, "easy").await;
        start_turn(&app, &id).await;

        let (status, body) = send(&app, "POST", &format!("/sessions/{id}/reset"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "awaiting_request");
        assert_eq!(body["message_count"], 0);

        let (status, _) = send(&app, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tool_catalog() {
        let (app, _) = test_app(vec![], Budgets::default());
        let (status, body) = send(&app, "GET", "/tools", None).await;
        assert_eq!(status, StatusCode::OK);

        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"search_exercises"));
        assert!(names.contains(&"save_exercise"));
        assert!(names.contains(&"web_search"));
        assert!(names.contains(&"structure_transcript"));
        assert!(body[0]["input_schema"].is_object());
    }

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/sessions",
            "/sessions/{id}",
            "/sessions/{id}/turns",
            "/sessions/{id}/reset",
            "/tools",
            "/assets",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
