//! The tools advertised to the model during exercise generation.

use super::ToolRegistry;
use crate::exercise::ExerciseRecord;
use crate::synthesizer::ExerciseSynthesizer;
use crate::vector_store::{AddOutcome, ExerciseVectorStore};
use crate::web_search::WebSearch;
use anyhow::{Context, Result, bail};
use schemars::JsonSchema;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const SEARCH_EXERCISES: &str = "search_exercises";
pub const GENERATE_SIMILAR_EXERCISE: &str = "generate_similar_exercise";
pub const SAVE_EXERCISE: &str = "save_exercise";
pub const EXTRACT_VOCABULARY: &str = "extract_vocabulary";
pub const FETCH_PAGE_CONTENT: &str = "fetch_page_content";
pub const WEB_SEARCH: &str = "web_search";
pub const STRUCTURE_TRANSCRIPT: &str = "structure_transcript";

const DEFAULT_MAX_CHARS: usize = 4000;
const DEFAULT_MAX_RESULTS: usize = 5;

/// Searches the exercise library for listening exercises similar to a query.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchExercisesArgs {
    /// What the exercise should be about, e.g. "ordering food at a restaurant".
    pub query: String,
    /// How many exercises to return (default 3).
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    3
}

/// Creates a new listening exercise about a topic, modelled on similar exercises from the
/// library. Returns null when the library has nothing related.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GenerateSimilarExerciseArgs {
    /// The topic of the new exercise.
    pub topic: String,
}

/// Saves an exercise (transcript and English translation) to the exercise library.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SaveExerciseArgs {
    pub topic: String,
    /// The language of the transcript, e.g. "Italian".
    pub target_language: String,
    pub transcript: String,
    pub translation: String,
}

/// Cleans up a raw transcript (subtitles, scraped page text) into a listening
/// exercise with an English translation and saves it to the exercise library.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StructureTranscriptArgs {
    /// The unprocessed transcript text.
    pub raw_text: String,
    pub topic: String,
    /// The language of the transcript, e.g. "Italian".
    pub target_language: String,
}

/// Searches the web and returns titles, URLs and snippets. Use
/// fetch_page_content to read a result.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WebSearchArgs {
    pub query: String,
    /// How many results to return (default 5, at most 10).
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Extracts the unique words of a text, lower-cased and sorted alphabetically.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractVocabularyArgs {
    pub text: String,
}

/// Downloads a web page and returns its visible text.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FetchPageContentArgs {
    /// An http(s) URL.
    pub url: String,
    /// Truncate the text to this many characters (default 4000).
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vocabulary {
    pub words: Vec<String>,
    pub word_count: usize,
}

/// Registers every exercise tool on `registry`.
pub fn register_exercise_tools(
    registry: &mut ToolRegistry,
    store: Arc<ExerciseVectorStore>,
    synthesizer: Arc<ExerciseSynthesizer>,
    search: Arc<dyn WebSearch>,
    http: reqwest::Client,
) {
    {
        let store = store.clone();
        registry.register(SEARCH_EXERCISES, move |args: SearchExercisesArgs| {
            let store = store.clone();
            async move {
                let hits = store.search(&args.query, args.k.clamp(1, 10)).await;
                Ok(hits
                    .into_iter()
                    .map(|hit| {
                        json!({
                            "id": hit.record.id,
                            "topic": hit.record.topic,
                            "target_language": hit.record.target_language,
                            "transcript": hit.record.transcript,
                            "translation": hit.record.translation,
                            "similarity_score": 1.0 - hit.distance,
                        })
                    })
                    .collect::<Vec<Value>>())
            }
        });
    }

    {
        let store = store.clone();
        let synthesizer = synthesizer.clone();
        registry.register(GENERATE_SIMILAR_EXERCISE, move |args: GenerateSimilarExerciseArgs| {
            let store = store.clone();
            let synthesizer = synthesizer.clone();
            async move {
                let Some(record) = synthesizer.generate_similar(&args.topic).await? else {
                    return Ok(Value::Null);
                };
                store.add(record.clone()).await;
                Ok::<_, anyhow::Error>(serde_json::to_value(record)?)
            }
        });
    }

    {
        let store = store.clone();
        registry.register(SAVE_EXERCISE, move |args: SaveExerciseArgs| {
            let store = store.clone();
            async move {
                if args.transcript.trim().is_empty() {
                    bail!("transcript is empty");
                }
                if args.target_language.trim().is_empty() {
                    bail!("target_language is empty");
                }
                let record = ExerciseRecord::new(
                    args.topic,
                    args.target_language.trim(),
                    args.transcript,
                    args.translation,
                );
                Ok::<_, anyhow::Error>(save_record(&store, record).await)
            }
        });
    }

    registry.register(STRUCTURE_TRANSCRIPT, move |args: StructureTranscriptArgs| {
        let store = store.clone();
        let synthesizer = synthesizer.clone();
        async move {
            if args.raw_text.trim().is_empty() {
                bail!("raw_text is empty");
            }
            let structured = synthesizer
                .structure_transcript(&args.raw_text, &args.topic, args.target_language.trim())
                .await?;
            let Some(record) = structured else {
                bail!("the transcript could not be structured, try a shorter excerpt");
            };
            let mut saved = save_record(&store, record.clone()).await;
            saved["transcript"] = json!(record.transcript);
            saved["translation"] = json!(record.translation);
            Ok::<_, anyhow::Error>(saved)
        }
    });

    registry.register(WEB_SEARCH, move |args: WebSearchArgs| {
        let search = search.clone();
        async move {
            let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, 10);
            search.search(&args.query, max_results).await
        }
    });

    registry.register(EXTRACT_VOCABULARY, |args: ExtractVocabularyArgs| async move {
        Ok(extract_vocabulary(&args.text))
    });

    registry.register(FETCH_PAGE_CONTENT, move |args: FetchPageContentArgs| {
        let http = http.clone();
        async move {
            let max_chars = args.max_chars.unwrap_or(DEFAULT_MAX_CHARS);
            fetch_page_content(&http, &args.url, max_chars).await
        }
    });
}

async fn save_record(store: &ExerciseVectorStore, record: ExerciseRecord) -> Value {
    let id = record.id.clone();
    match store.add(record).await {
        AddOutcome::Inserted => json!({"id": id, "saved": true}),
        AddOutcome::Duplicate { existing_id } => {
            json!({"id": existing_id, "saved": false, "reason": "duplicate"})
        }
    }
}

/// Unique alphabetic words of `text`, lower-cased and sorted.
pub fn extract_vocabulary(text: &str) -> Vocabulary {
    let words: BTreeSet<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect();
    Vocabulary {
        word_count: words.len(),
        words: words.into_iter().collect(),
    }
}

async fn fetch_page_content(
    http: &reqwest::Client,
    url: &str,
    max_chars: usize,
) -> Result<String> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("only http and https URLs can be fetched, got '{}'", url);
    }
    let html = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to '{}' failed", url))?
        .error_for_status()?
        .text()
        .await?;
    Ok(extract_visible_text(&html, max_chars))
}

/// The text a reader would see: script, style and noscript contents are
/// dropped and whitespace is collapsed.
pub fn extract_visible_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();
    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript" | "head"))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ").chars().take(max_chars).collect()
}
