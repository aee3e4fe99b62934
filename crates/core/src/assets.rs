//! Asset Pipeline
//!
//! Turns a text prompt into a stored image or audio file: the matching
//! generator is called once, its base64 payload is decoded into a scoped
//! temporary directory and uploaded to object storage under a
//! content-derived filename.

use crate::storage::ObjectStore;
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        CreateImageRequestArgs, CreateSpeechRequestArgs, Image, ImageResponseFormat, ImageSize,
        SpeechModel, SpeechResponseFormat, Voice,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Audio,
}

impl AssetKind {
    fn prefix(self) -> &'static str {
        match self {
            AssetKind::Image => "images",
            AssetKind::Audio => "audio",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            AssetKind::Image => "png",
            AssetKind::Audio => "mp3",
        }
    }
}

/// A generated media file. Failed assets carry an error and no path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: AssetKind,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Asset {
    pub fn stored(kind: AssetKind, filename: String, path: String) -> Self {
        Self {
            kind,
            filename,
            path: Some(path),
            error: None,
        }
    }

    pub fn failed(kind: AssetKind, filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            path: None,
            error: Some(error.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

/// Produces a base64-encoded PNG from a description.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> Result<String>;
}

/// Produces base64-encoded MP3 speech from a script.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<String>;
}

pub struct OpenAIImageGenerator {
    client: Client<OpenAIConfig>,
}

impl OpenAIImageGenerator {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAIImageGenerator {
    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .n(1)
            .size(ImageSize::S512x512)
            .response_format(ImageResponseFormat::B64Json)
            .build()?;
        let response = self.client.images().create(request).await?;
        let image = response
            .data
            .first()
            .context("Image generation returned no images")?;
        match image.as_ref() {
            Image::B64Json { b64_json, .. } => Ok(b64_json.to_string()),
            Image::Url { .. } => Err(anyhow!(
                "Image generation returned a URL instead of base64 data"
            )),
        }
    }
}

pub struct OpenAISpeechSynthesizer {
    client: Client<OpenAIConfig>,
    voice: Voice,
}

impl OpenAISpeechSynthesizer {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
            voice: Voice::Alloy,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<String> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .voice(self.voice.clone())
            .model(SpeechModel::Tts1)
            .response_format(SpeechResponseFormat::Mp3)
            .build()?;
        let response = self.client.audio().speech(request).await?;
        Ok(STANDARD.encode(&response.bytes))
    }
}

pub struct AssetPipeline {
    images: Arc<dyn ImageGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn ObjectStore>,
}

impl AssetPipeline {
    pub fn new(
        images: Arc<dyn ImageGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            images,
            speech,
            store,
        }
    }

    /// Generates one asset and uploads it.
    ///
    /// Never fails: generator or upload errors yield a failed [`Asset`] that
    /// the caller can omit.
    pub async fn generate_and_store(&self, kind: AssetKind, prompt: &str, filename: &str) -> Asset {
        let generated = match kind {
            AssetKind::Image => self.images.generate_image(prompt).await,
            AssetKind::Audio => self.speech.synthesize(prompt).await,
        };
        let payload = match generated {
            Ok(payload) => payload,
            Err(e) => {
                warn!(?kind, error = %e, "Asset generation failed");
                return Asset::failed(kind, filename, format!("generation failed: {}", e));
            }
        };

        match self.upload(kind, &payload, filename).await {
            Ok((name, path)) => {
                info!(?kind, %path, "Stored generated asset");
                Asset::stored(kind, name, path)
            }
            Err(e) => {
                warn!(?kind, error = %e, "Asset upload failed");
                Asset::failed(kind, filename, format!("upload failed: {:#}", e))
            }
        }
    }

    /// Reads a previously stored asset. No caching happens at this layer.
    pub async fn fetch(&self, path: &str) -> Result<Bytes> {
        self.store.get(path).await
    }

    async fn upload(
        &self,
        kind: AssetKind,
        payload: &str,
        filename: &str,
    ) -> Result<(String, String)> {
        let data = STANDARD
            .decode(payload.trim())
            .context("Generated payload is not valid base64")?;
        let name = content_filename(kind, filename, &data);
        let key = format!("{}/{}", kind.prefix(), name);

        let temp_dir = tempfile::Builder::new()
            .prefix("parlare-asset-")
            .tempdir()
            .context("Failed to create temporary directory")?;
        let local = temp_dir.path().join(&name);
        let uploaded = async {
            tokio::fs::write(&local, &data)
                .await
                .with_context(|| format!("Failed to write '{}'", local.display()))?;
            self.store.upload_file(&local, &key).await
        }
        .await;

        if let Err(e) = temp_dir.close() {
            warn!(error = %e, "Failed to remove temporary asset directory");
        }
        uploaded.map(|path| (name, path))
    }
}

/// `<sanitized stem>_<first 12 hex digits of sha256(data)>.<ext>`
pub fn content_filename(kind: AssetKind, descriptive: &str, data: &[u8]) -> String {
    let stem = descriptive
        .rsplit_once('.')
        .map_or(descriptive, |(stem, _)| stem);
    let mut sanitized = String::with_capacity(stem.len());
    for c in stem.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            sanitized.push(c);
        } else if !sanitized.is_empty() && !sanitized.ends_with('_') {
            sanitized.push('_');
        }
    }
    let sanitized = sanitized.trim_end_matches('_');
    let sanitized = if sanitized.is_empty() {
        match kind {
            AssetKind::Image => "image",
            AssetKind::Audio => "audio",
        }
    } else {
        sanitized
    };

    let digest = Sha256::digest(data);
    let hash: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}.{}", sanitized, hash, kind.extension())
}
