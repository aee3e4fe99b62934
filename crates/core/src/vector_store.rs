//! Exercise Vector Store
//!
//! An in-memory cosine-similarity index over exercise records. Each record
//! keeps two embeddings: its full text (topic, transcript, translation) for
//! search, and its bare transcript for duplicate detection. A failing
//! embedding service degrades to a zero vector, which is never considered
//! close to anything. A store with a snapshot path rewrites its snapshot after
//! every insert.

use crate::exercise::ExerciseRecord;
use anyhow::{Context, Result};
use async_openai::{Client, config::OpenAIConfig, types::CreateEmbeddingRequestArgs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector returned by `embed`.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            dimensions: 1536,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()?;
        let response = self.client.embeddings().create(request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .context("Embedding response contained no vectors")?;
        Ok(embedding.embedding)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedExercise {
    record: ExerciseRecord,
    embedding: Vec<f32>,
    transcript_embedding: Vec<f32>,
}

/// A search hit. Lower distance means more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredExercise {
    pub record: ExerciseRecord,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Duplicate { existing_id: String },
}

pub struct ExerciseVectorStore {
    embedder: Arc<dyn Embedder>,
    duplicate_threshold: f32,
    entries: RwLock<Vec<IndexedExercise>>,
    snapshot_path: Option<PathBuf>,
    /// Serializes snapshot writers so the newest state is written last.
    save_lock: Mutex<()>,
}

impl ExerciseVectorStore {
    pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.05;

    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            duplicate_threshold: Self::DEFAULT_DUPLICATE_THRESHOLD,
            entries: RwLock::new(Vec::new()),
            snapshot_path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Saves a snapshot to `path` after every successful insert.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Records whose nearest neighbour is within `threshold` are not inserted.
    pub fn with_duplicate_threshold(mut self, threshold: f32) -> Self {
        self.duplicate_threshold = threshold;
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Returns up to `k` records ordered by ascending cosine distance.
    /// Equal distances keep insertion order.
    pub async fn search(&self, query: &str, k: usize) -> Vec<ScoredExercise> {
        let query = self.embed_or_zero(query).await;
        let entries = self.entries.read().await;
        rank(&entries, &query, k, |e| &e.embedding)
    }

    /// Inserts `record` unless an equivalent exercise is already indexed.
    pub async fn add(&self, record: ExerciseRecord) -> AddOutcome {
        let outcome = self.insert(record).await;
        if outcome == AddOutcome::Inserted {
            self.persist().await;
        }
        outcome
    }

    async fn insert(&self, record: ExerciseRecord) -> AddOutcome {
        let embedding = self.embed_or_zero(&record.embedding_text()).await;
        let transcript_embedding = self.embed_or_zero(&record.transcript).await;

        let mut entries = self.entries.write().await;
        if let Some(existing_id) = self.find_duplicate(&entries, &record, &transcript_embedding) {
            info!(id = %record.id, %existing_id, "Skipping duplicate exercise");
            return AddOutcome::Duplicate { existing_id };
        }
        info!(id = %record.id, topic = %record.topic, "Indexed exercise");
        entries.push(IndexedExercise {
            record,
            embedding,
            transcript_embedding,
        });
        AddOutcome::Inserted
    }

    fn find_duplicate(
        &self,
        entries: &[IndexedExercise],
        record: &ExerciseRecord,
        transcript_query: &[f32],
    ) -> Option<String> {
        let transcript = normalize(&record.transcript);
        if let Some(same) = entries
            .iter()
            .find(|e| e.record.id == record.id || normalize(&e.record.transcript) == transcript)
        {
            return Some(same.record.id.clone());
        }
        rank(entries, transcript_query, 1, |e| &e.transcript_embedding)
            .into_iter()
            .find(|hit| hit.distance <= self.duplicate_threshold)
            .map(|hit| hit.record.id)
    }

    async fn embed_or_zero(&self, text: &str) -> Vec<f32> {
        let dims = self.embedder.dimensions();
        match self.embedder.embed(text).await {
            Ok(vector) if vector.len() == dims => vector,
            Ok(vector) => {
                warn!(
                    expected = dims,
                    got = vector.len(),
                    "Embedding has wrong dimensions, using zero vector"
                );
                vec![0.0; dims]
            }
            Err(e) => {
                warn!(error = %e, "Embedding failed, using zero vector");
                vec![0.0; dims]
            }
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if let Err(e) = self.save(path).await {
            warn!(path = %path.display(), error = %e, "Failed to persist vector store snapshot");
        }
    }

    /// Writes every record and its embedding to a JSON snapshot.
    ///
    /// The snapshot is written to a temporary file and renamed over `path`, so
    /// a crash mid-write leaves the previous snapshot intact.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let _writer = self.save_lock.lock().await;
        let (json, records) = {
            let entries = self.entries.read().await;
            (serde_json::to_string(&*entries)?, entries.len())
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write vector store snapshot '{}'", tmp.display()))?;
        tokio::fs::rename(&tmp, path).await.with_context(|| {
            format!("Failed to replace vector store snapshot '{}'", path.display())
        })?;
        info!(path = %path.display(), records, "Saved vector store snapshot");
        Ok(())
    }

    /// Restores a snapshot written by [`save`](Self::save). A missing file
    /// gives an empty store.
    pub async fn load(embedder: Arc<dyn Embedder>, path: &Path) -> Result<Self> {
        let store = Self::new(embedder);
        if !path.exists() {
            return Ok(store);
        }
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read vector store snapshot '{}'", path.display()))?;
        let entries: Vec<IndexedExercise> = serde_json::from_str(&json)
            .with_context(|| format!("Malformed vector store snapshot '{}'", path.display()))?;
        info!(path = %path.display(), records = entries.len(), "Loaded vector store snapshot");
        *store.entries.write().await = entries;
        Ok(store)
    }

    /// Indexes every `*.json` exercise file in `dir`.
    ///
    /// Files hold `{transcript, translation | english_translation, topic?,
    /// target_language?}`; the file stem becomes the record id. Returns how
    /// many records were inserted.
    pub async fn index_directory(&self, dir: &Path, default_language: &str) -> Result<usize> {
        let mut files = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read exercise directory '{}'", dir.display()))?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        let mut inserted = 0;
        for path in files {
            let record = match read_exercise_file(&path, default_language).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable exercise file");
                    continue;
                }
            };
            if self.insert(record).await == AddOutcome::Inserted {
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.persist().await;
        }
        Ok(inserted)
    }
}

#[derive(Deserialize)]
struct ExerciseFile {
    transcript: String,
    #[serde(alias = "english_translation")]
    translation: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    target_language: Option<String>,
}

async fn read_exercise_file(path: &Path, default_language: &str) -> Result<ExerciseRecord> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Could not get file stem")?
        .to_string();
    let json = tokio::fs::read_to_string(path).await?;
    let file: ExerciseFile = serde_json::from_str(&json)?;
    Ok(ExerciseRecord {
        topic: file.topic.unwrap_or_else(|| id.replace(['_', '-'], " ")),
        id,
        target_language: file
            .target_language
            .unwrap_or_else(|| default_language.to_string()),
        transcript: file.transcript,
        translation: file.translation,
        media: Vec::new(),
    })
}

fn rank(
    entries: &[IndexedExercise],
    query: &[f32],
    k: usize,
    embedding: impl Fn(&IndexedExercise) -> &Vec<f32>,
) -> Vec<ScoredExercise> {
    let mut scored: Vec<ScoredExercise> = entries
        .iter()
        .map(|e| ScoredExercise {
            record: e.record.clone(),
            distance: cosine_distance(query, embedding(e)),
        })
        .collect();
    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    scored.truncate(k);
    scored
}

/// `1 - cos(a, b)`; a zero vector is at distance 1 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
