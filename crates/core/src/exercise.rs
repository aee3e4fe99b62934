//! Exercise Data Model
//!
//! This module defines the request a session is created from, the three
//! difficulty-specific output variants the model may produce, quiz items and the
//! exercise records kept in the vector store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The difficulty of an exercise. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// The output variant a response must take for this difficulty.
    pub fn expected_kind(self) -> VariantKind {
        match self {
            Difficulty::Easy => VariantKind::TextExercise,
            Difficulty::Medium => VariantKind::ImageExercise,
            Difficulty::Hard => VariantKind::AudioQuizExercise,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!(
                "'{}' is not a difficulty (expected easy, medium or hard)",
                other
            )),
        }
    }
}

/// What the learner asked for when the session was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRequest {
    pub topic: String,
    pub difficulty: Difficulty,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<String>,
}

impl ExerciseRequest {
    pub fn new(
        topic: impl Into<String>,
        difficulty: Difficulty,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            difficulty,
            target_language: target_language.into(),
            user_context: None,
        }
    }

    /// The first user turn sent to the model when the learner gave no input.
    pub fn bootstrap_message(&self) -> String {
        format!(
            "Generate a {} {} exercise about: {}. Context: {}",
            self.difficulty,
            self.target_language,
            self.topic,
            self.user_context.as_deref().unwrap_or("None")
        )
    }
}

/// The discriminator of [`OutputVariant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    TextExercise,
    ImageExercise,
    AudioQuizExercise,
}

impl VariantKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VariantKind::TextExercise => "text_exercise",
            VariantKind::ImageExercise => "image_exercise",
            VariantKind::AudioQuizExercise => "audio_quiz_exercise",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "text_exercise" => Some(VariantKind::TextExercise),
            "image_exercise" => Some(VariantKind::ImageExercise),
            "audio_quiz_exercise" => Some(VariantKind::AudioQuizExercise),
            _ => None,
        }
    }

    /// An example of the JSON the model must produce, embedded in the system prompt.
    pub fn contract_example(self) -> &'static str {
        match self {
            VariantKind::TextExercise => concat!(
                r#"{"kind": "text_exercise", "exercise_type": "Translation Task", "#,
                r#""difficulty": "easy", "response_to_user": "...", "text_content": "...", "#,
                r#""original_topic": "...", "original_target_language": "..."}"#,
            ),
            VariantKind::ImageExercise => concat!(
                r#"{"kind": "image_exercise", "exercise_type": "Image Description", "#,
                r#""difficulty": "medium", "response_to_user": "...", "#,
                r#""text_content": "... (optional)", "#,
                r#""image_request": {"description": "what the image shows", "#,
                r#""descriptive_filename": "words_separated_by_underscores.png"}, "#,
                r#""original_topic": "...", "original_target_language": "..."}"#,
            ),
            VariantKind::AudioQuizExercise => concat!(
                r#"{"kind": "audio_quiz_exercise", "#,
                r#""exercise_type": "Listening Comprehension Quiz", "difficulty": "hard", "#,
                r#""response_to_user": "...", "#,
                r#""listening_script": "text that will be read aloud", "#,
                r#""audio_filename": "words_separated_by_underscores.mp3", "#,
                r#""quiz_questions": [{"question": "...", "options": ["#,
                r#"{"option": "...", "is_correct": true, "feedback": "..."}, "#,
                r#"{"option": "...", "is_correct": false, "feedback": "..."}]}], "#,
                r#""original_topic": "...", "original_target_language": "..."}"#,
            ),
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every output variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseHeader {
    /// A descriptive name, e.g. "Translation Task" or "Listening Comprehension Quiz".
    pub exercise_type: String,
    pub difficulty: Difficulty,
    /// The instruction, question or feedback shown to the learner, in the target language.
    pub response_to_user: String,
    pub original_topic: String,
    pub original_target_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextExercise {
    #[serde(flatten)]
    pub header: ExerciseHeader,
    pub text_content: String,
}

/// What the dispatcher needs to ask the image generator for a picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub description: String,
    pub descriptive_filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageExercise {
    #[serde(flatten)]
    pub header: ExerciseHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_request: Option<ImageRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioQuizExercise {
    #[serde(flatten)]
    pub header: ExerciseHeader,
    /// Text read aloud by the speech synthesizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listening_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_filename: Option<String>,
    pub quiz_questions: Vec<QuizItem>,
}

/// The structured output of a completed turn.
///
/// The `kind` tag is fixed once parsed and selects the asset step the
/// dispatcher runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputVariant {
    TextExercise(TextExercise),
    ImageExercise(ImageExercise),
    AudioQuizExercise(AudioQuizExercise),
}

impl OutputVariant {
    pub fn kind(&self) -> VariantKind {
        match self {
            OutputVariant::TextExercise(_) => VariantKind::TextExercise,
            OutputVariant::ImageExercise(_) => VariantKind::ImageExercise,
            OutputVariant::AudioQuizExercise(_) => VariantKind::AudioQuizExercise,
        }
    }

    pub fn header(&self) -> &ExerciseHeader {
        match self {
            OutputVariant::TextExercise(ex) => &ex.header,
            OutputVariant::ImageExercise(ex) => &ex.header,
            OutputVariant::AudioQuizExercise(ex) => &ex.header,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizOption {
    pub option: String,
    pub is_correct: bool,
    #[serde(default)]
    pub feedback: String,
}

/// A quiz question with either options or, as a fallback, a single correct answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizItem {
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<QuizOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

impl QuizItem {
    pub fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("quiz question is empty".to_string());
        }
        if self.options.is_empty() {
            return match &self.correct_answer {
                Some(answer) if !answer.trim().is_empty() => Ok(()),
                _ => Err(format!(
                    "quiz question '{}' has neither options nor a correct answer",
                    self.question
                )),
            };
        }
        let correct = self.options.iter().filter(|o| o.is_correct).count();
        if correct != 1 {
            return Err(format!(
                "quiz question '{}' must have exactly one correct option, found {}",
                self.question, correct
            ));
        }
        Ok(())
    }
}

/// Why a model response could not be turned into an [`OutputVariant`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputParseError {
    #[error("response is not a JSON object: {0}")]
    NotJson(String),
    #[error("response has no `kind` field")]
    MissingKind,
    #[error("unknown `kind` '{0}'")]
    UnknownKind(String),
    #[error("expected `kind` '{expected}' for this difficulty, got '{found}'")]
    WrongKind {
        expected: VariantKind,
        found: VariantKind,
    },
    #[error("expected difficulty '{expected}', got '{found}'")]
    WrongDifficulty {
        expected: Difficulty,
        found: Difficulty,
    },
    #[error("invalid {kind}: {message}")]
    Invalid { kind: VariantKind, message: String },
}

/// Extracts the JSON object from a model response, tolerating markdown fences
/// and surrounding prose.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parses a raw model response into the variant required by `difficulty`.
pub fn parse_output(raw: &str, difficulty: Difficulty) -> Result<OutputVariant, OutputParseError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| OutputParseError::NotJson("no JSON object found".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| OutputParseError::NotJson(e.to_string()))?;

    let tag = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or(OutputParseError::MissingKind)?;
    let found =
        VariantKind::parse(tag).ok_or_else(|| OutputParseError::UnknownKind(tag.to_string()))?;
    let expected = difficulty.expected_kind();
    if found != expected {
        return Err(OutputParseError::WrongKind { expected, found });
    }

    let variant: OutputVariant =
        serde_json::from_value(value).map_err(|e| OutputParseError::Invalid {
            kind: found,
            message: e.to_string(),
        })?;

    let invalid = |message: String| OutputParseError::Invalid { kind: found, message };
    let header = variant.header();
    if header.difficulty != difficulty {
        return Err(OutputParseError::WrongDifficulty {
            expected: difficulty,
            found: header.difficulty,
        });
    }
    if header.response_to_user.trim().is_empty() {
        return Err(invalid("`response_to_user` is empty".to_string()));
    }
    if let OutputVariant::AudioQuizExercise(ex) = &variant {
        if ex.quiz_questions.is_empty() {
            return Err(invalid("`quiz_questions` is empty".to_string()));
        }
        for item in &ex.quiz_questions {
            item.validate().map_err(invalid)?;
        }
    }
    Ok(variant)
}

/// A listening exercise kept in the vector store and used as a few-shot example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecord {
    /// Stable identifier, e.g. a source video id or a content hash.
    pub id: String,
    pub topic: String,
    pub target_language: String,
    pub transcript: String,
    #[serde(alias = "english_translation")]
    pub translation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
}

impl ExerciseRecord {
    /// Creates a record whose id is derived from its topic and transcript.
    pub fn new(
        topic: impl Into<String>,
        target_language: impl Into<String>,
        transcript: impl Into<String>,
        translation: impl Into<String>,
    ) -> Self {
        let topic = topic.into();
        let transcript = transcript.into();
        let id = content_id(&topic, &transcript);
        Self {
            id,
            topic,
            target_language: target_language.into(),
            transcript,
            translation: translation.into(),
            media: Vec::new(),
        }
    }

    /// The text embedded when the record is indexed.
    pub fn embedding_text(&self) -> String {
        format!(
            "Topic: {}\nExercise: {}\nTranslation: {}",
            self.topic, self.transcript, self.translation
        )
    }
}

fn content_id(topic: &str, transcript: &str) -> String {
    let digest = Sha256::new()
        .chain_update(topic.trim().to_lowercase())
        .chain_update([0u8])
        .chain_update(transcript.trim())
        .finalize();
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}
