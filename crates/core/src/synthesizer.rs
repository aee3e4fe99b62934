//! Exercise Synthesizer
//!
//! Creates a new listening exercise from the closest indexed ones, using them
//! as few-shot examples for a single completion.

use crate::exercise::{ExerciseRecord, extract_json_object};
use crate::llm_client::LLMClient;
use crate::prompts::{GENERATE_SIMILAR_EXERCISE, PromptSet, STRUCTURE_TRANSCRIPT};
use crate::vector_store::{ExerciseVectorStore, ScoredExercise};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You write short listening-comprehension exercises for language \
    learners. Answer with JSON only.";

#[derive(Deserialize)]
struct GeneratedExercise {
    transcript: String,
    #[serde(alias = "english_translation")]
    translation: String,
}

pub struct ExerciseSynthesizer {
    store: Arc<ExerciseVectorStore>,
    llm: Arc<dyn LLMClient>,
    prompts: Arc<PromptSet>,
    examples: usize,
    max_distance: f32,
}

impl ExerciseSynthesizer {
    pub const DEFAULT_MAX_DISTANCE: f32 = 0.75;

    pub fn new(
        store: Arc<ExerciseVectorStore>,
        llm: Arc<dyn LLMClient>,
        prompts: Arc<PromptSet>,
    ) -> Self {
        Self {
            store,
            llm,
            prompts,
            examples: 3,
            max_distance: Self::DEFAULT_MAX_DISTANCE,
        }
    }

    /// Examples farther than `max_distance` from the topic are ignored.
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Generates an exercise similar to the indexed ones about `topic`.
    ///
    /// Returns `Ok(None)` when nothing relevant is indexed or the model's
    /// answer cannot be used. Completion service errors are returned as `Err`.
    pub async fn generate_similar(&self, topic: &str) -> Result<Option<ExerciseRecord>> {
        let examples: Vec<ScoredExercise> = self
            .store
            .search(topic, self.examples)
            .await
            .into_iter()
            .filter(|hit| hit.distance <= self.max_distance)
            .collect();
        let Some(closest) = examples.first() else {
            info!(%topic, "No similar exercises found");
            return Ok(None);
        };
        let language = closest.record.target_language.clone();

        let rendered_examples = examples
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "Example {}:\nTranscript: {}\nTranslation: {}",
                    i + 1,
                    hit.record.transcript,
                    hit.record.translation
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = self.prompts.render(
            GENERATE_SIMILAR_EXERCISE,
            &[
                ("topic", topic),
                ("target_language", language.as_str()),
                ("examples", rendered_examples.as_str()),
            ],
        )?;

        let raw = self.llm.complete(SYSTEM_PROMPT.to_string(), prompt).await?;
        let Some(generated) = parse_generated(&raw, topic) else {
            return Ok(None);
        };

        info!(%topic, examples = examples.len(), "Generated similar exercise");
        Ok(Some(ExerciseRecord::new(
            topic,
            language,
            generated.transcript.trim(),
            generated.translation.trim(),
        )))
    }

    /// Turns a raw transcript (e.g. scraped subtitles or a pasted lesson)
    /// into a clean exercise with its English translation.
    ///
    /// Returns `Ok(None)` when the model's answer cannot be used.
    pub async fn structure_transcript(
        &self,
        raw_text: &str,
        topic: &str,
        target_language: &str,
    ) -> Result<Option<ExerciseRecord>> {
        let prompt = self.prompts.render(
            STRUCTURE_TRANSCRIPT,
            &[
                ("topic", topic),
                ("target_language", target_language),
                ("raw_text", raw_text),
            ],
        )?;
        let raw = self.llm.complete(SYSTEM_PROMPT.to_string(), prompt).await?;
        let Some(structured) = parse_generated(&raw, topic) else {
            return Ok(None);
        };

        info!(%topic, %target_language, "Structured raw transcript");
        Ok(Some(ExerciseRecord::new(
            topic,
            target_language,
            structured.transcript.trim(),
            structured.translation.trim(),
        )))
    }
}

fn parse_generated(raw: &str, topic: &str) -> Option<GeneratedExercise> {
    let Some(generated) = extract_json_object(raw)
        .and_then(|json| serde_json::from_str::<GeneratedExercise>(json).ok())
    else {
        warn!(%topic, "Generated exercise was not valid JSON");
        return None;
    };
    if generated.transcript.trim().is_empty() || generated.translation.trim().is_empty() {
        warn!(%topic, "Generated exercise was empty");
        return None;
    }
    Some(generated)
}
