//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the live sessions
//! and every service a turn needs: the turn controller, the output
//! dispatcher, the tool registry and the exercise library.
//!
//! A turn can hold its session for as long as the model and media services
//! take. Readers never wait for it: each [`SessionHandle`] keeps a copy of
//! the session as of its last unlock.

use crate::config::Config;
use anyhow::{Context, Result};
use async_openai::config::OpenAIConfig;
use parlare_core::{
    assets::{
        AssetPipeline, ImageGenerator, OpenAIImageGenerator, OpenAISpeechSynthesizer,
        SpeechSynthesizer,
    },
    controller::TurnController,
    dispatcher::OutputDispatcher,
    llm_client::{LLMClient, OpenAICompatibleClient},
    prompts::PromptSet,
    session::{Budgets, Session},
    storage::{LocalObjectStore, ObjectStore},
    synthesizer::ExerciseSynthesizer,
    tools::{ToolRegistry, builtin::register_exercise_tools},
    vector_store::{Embedder, ExerciseVectorStore, OpenAIEmbedder},
    web_search::{DuckDuckGoSearch, WebSearch},
};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use tracing::info;
use uuid::Uuid;

/// The external services the application is built from.
pub struct Services {
    pub llm: Arc<dyn LLMClient>,
    pub images: Arc<dyn ImageGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub object_store: Arc<dyn ObjectStore>,
    pub vector_store: Arc<ExerciseVectorStore>,
    pub web_search: Arc<dyn WebSearch>,
    pub prompts: Arc<PromptSet>,
}

impl Services {
    /// Connects to the OpenAI-compatible endpoints named in `config` and
    /// restores the exercise library.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let openai = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_api_base.clone());

        let prompts = PromptSet::load_dir(&config.prompts_path).context("Failed to load prompts")?;

        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::new(
            openai.clone(),
            config.embedding_model.clone(),
        ));
        let vector_store = ExerciseVectorStore::load(embedder, &config.vector_store_path)
            .await
            .context("Failed to load the exercise library")?
            .with_snapshot_path(config.vector_store_path.clone());
        if let Some(dir) = &config.exercises_path {
            let inserted = vector_store
                .index_directory(dir, &config.target_language)
                .await
                .context("Failed to index exercise files")?;
            info!(path = %dir.display(), inserted, "Indexed exercise files");
        }

        let llm = OpenAICompatibleClient::new(openai.clone(), config.chat_model.clone())
            .with_temperature(config.temperature);

        Ok(Self {
            llm: Arc::new(llm),
            images: Arc::new(OpenAIImageGenerator::new(openai.clone())),
            speech: Arc::new(OpenAISpeechSynthesizer::new(openai)),
            object_store: Arc::new(LocalObjectStore::new(
                config.storage_root.clone(),
                config.storage_bucket.clone(),
            )),
            vector_store: Arc::new(vector_store),
            web_search: Arc::new(DuckDuckGoSearch::new(reqwest::Client::new())),
            prompts: Arc::new(prompts),
        })
    }
}

/// Values applied to every new session.
#[derive(Clone, Debug)]
pub struct SessionDefaults {
    pub target_language: String,
    pub budgets: Budgets,
    pub tool_concurrency: usize,
}

impl From<&Config> for SessionDefaults {
    fn from(config: &Config) -> Self {
        Self {
            target_language: config.target_language.clone(),
            budgets: config.budgets,
            tool_concurrency: config.tool_concurrency,
        }
    }
}

/// A live session shared between requests.
pub struct SessionHandle {
    session: Mutex<Session>,
    published: watch::Sender<Session>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        let (published, _) = watch::channel(session.clone());
        Self {
            session: Mutex::new(session),
            published,
        }
    }

    /// Exclusive access for a turn or reset. The changes become visible to
    /// [`view`](Self::view) when the guard is dropped.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self.session.lock().await,
            published: &self.published,
        }
    }

    /// Reads the session without waiting. While a turn holds the lock, `f`
    /// gets the state from before the turn and `busy` is true.
    pub fn view<T>(&self, f: impl FnOnce(&Session, bool) -> T) -> T {
        match self.session.try_lock() {
            Ok(session) => f(&*session, false),
            Err(_) => f(&*self.published.borrow(), true),
        }
    }
}

/// Publishes the session to readers on drop, including when a turn fails or
/// its request is cancelled.
pub struct SessionGuard<'a> {
    session: MutexGuard<'a, Session>,
    published: &'a watch::Sender<Session>,
}

impl Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.published.send_replace(self.session.clone());
    }
}

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    pub controller: TurnController,
    pub dispatcher: OutputDispatcher,
    pub tools: Arc<ToolRegistry>,
    pub assets: Arc<AssetPipeline>,
    pub vector_store: Arc<ExerciseVectorStore>,
    pub defaults: SessionDefaults,
}

impl AppState {
    pub fn new(services: Services, defaults: SessionDefaults) -> Self {
        let synthesizer = Arc::new(ExerciseSynthesizer::new(
            services.vector_store.clone(),
            services.llm.clone(),
            services.prompts.clone(),
        ));

        let mut registry = ToolRegistry::new(defaults.tool_concurrency);
        register_exercise_tools(
            &mut registry,
            services.vector_store.clone(),
            synthesizer,
            services.web_search,
            reqwest::Client::new(),
        );
        let tools = Arc::new(registry);

        let assets = Arc::new(AssetPipeline::new(
            services.images,
            services.speech,
            services.object_store,
        ));

        Self {
            sessions: RwLock::new(HashMap::new()),
            controller: TurnController::new(services.llm, tools.clone(), services.prompts),
            dispatcher: OutputDispatcher::new(assets.clone()),
            tools,
            assets,
            vector_store: services.vector_store,
            defaults,
        }
    }

    /// The session handle for `id`, if it exists. The map lock is released
    /// before the caller locks the session.
    pub async fn session(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(&id).cloned()
    }
}
