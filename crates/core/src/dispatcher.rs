//! Output Schema Dispatcher
//!
//! Turns a parsed [`OutputVariant`] into something a front end can render,
//! running the asset step its kind requires. Each asset kind is generated at
//! most once per session; later dispatches reuse the stored asset, including
//! a failed one.

use crate::assets::{Asset, AssetKind, AssetPipeline};
use crate::exercise::{OutputVariant, QuizItem};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderableResult {
    pub variant: OutputVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quiz: Vec<QuizItem>,
    /// Why an expected asset is missing, if it is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<String>,
}

impl RenderableResult {
    fn new(variant: OutputVariant) -> Self {
        Self {
            variant,
            image_path: None,
            audio_path: None,
            quiz: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// The text shown to the learner.
    pub fn response_to_user(&self) -> &str {
        &self.variant.header().response_to_user
    }
}

pub struct OutputDispatcher {
    assets: Arc<AssetPipeline>,
}

impl OutputDispatcher {
    pub fn new(assets: Arc<AssetPipeline>) -> Self {
        Self { assets }
    }

    pub async fn dispatch(
        &self,
        session: &mut Session,
        variant: OutputVariant,
    ) -> RenderableResult {
        let mut result = RenderableResult::new(variant.clone());
        match variant {
            OutputVariant::TextExercise(_) => {}
            OutputVariant::ImageExercise(exercise) => {
                let asset = if let Some(existing) = &session.assets.image {
                    Some(existing.clone())
                } else if let Some(request) = exercise.image_request {
                    let asset = self
                        .assets
                        .generate_and_store(
                            AssetKind::Image,
                            &request.description,
                            &request.descriptive_filename,
                        )
                        .await;
                    session.assets.image = Some(asset.clone());
                    Some(asset)
                } else {
                    None
                };
                result.image_path = attach(asset, "image", &mut result.notices);
            }
            OutputVariant::AudioQuizExercise(exercise) => {
                result.quiz = exercise.quiz_questions;
                let script = exercise
                    .listening_script
                    .filter(|script| !script.trim().is_empty());
                let asset = if let Some(existing) = &session.assets.audio {
                    Some(existing.clone())
                } else if let Some(script) = script {
                    let filename = exercise
                        .audio_filename
                        .unwrap_or_else(|| format!("{}.mp3", exercise.header.original_topic));
                    let asset = self
                        .assets
                        .generate_and_store(AssetKind::Audio, &script, &filename)
                        .await;
                    session.assets.audio = Some(asset.clone());
                    Some(asset)
                } else {
                    None
                };
                result.audio_path = attach(asset, "audio", &mut result.notices);
            }
        }
        info!(
            session_id = %session.id,
            kind = %result.variant.kind(),
            image = result.image_path.is_some(),
            audio = result.audio_path.is_some(),
            "Dispatched exercise"
        );
        result
    }
}

fn attach(asset: Option<Asset>, label: &str, notices: &mut Vec<String>) -> Option<String> {
    let asset = asset?;
    if asset.path.is_none() {
        warn!(filename = %asset.filename, "Omitting unavailable {}", label);
        notices.push(format!(
            "The {} for this exercise is unavailable ({}).",
            label,
            asset.error.as_deref().unwrap_or("unknown error")
        ));
    }
    asset.path
}
