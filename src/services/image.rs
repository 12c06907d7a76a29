use crate::services::llm::{endpoint, resolve_api_key, ApiError, GEMINI_API_BASE, OPENAI_API_BASE};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Style appended to every page and cover prompt unless the config overrides it.
pub const DEFAULT_IMAGE_STYLE: &str =
    "soft watercolor children's book illustration, warm pastel colors, simple rounded shapes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

#[async_trait]
pub trait ImageClient: Send + Sync + Debug {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<GeneratedImage>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_image_style")]
    pub style: String,
    #[serde(default = "default_image_concurrency")]
    pub concurrency: usize,
    pub gemini: Option<ImagenConfig>,
    pub openai: Option<OpenAIImageConfig>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            aspect_ratio: default_aspect_ratio(),
            style: default_image_style(),
            concurrency: default_image_concurrency(),
            gemini: Some(ImagenConfig::default()),
            openai: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImagenConfig {
    /// Falls back to `GEMINI_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_imagen_model")]
    pub model: String,
}

impl Default for ImagenConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_imagen_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIImageConfig {
    /// Falls back to `OPENAI_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_image_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_image_provider() -> String {
    "gemini".to_string()
}
fn default_aspect_ratio() -> String {
    "1:1".to_string()
}
fn default_image_style() -> String {
    DEFAULT_IMAGE_STYLE.to_string()
}
fn default_image_concurrency() -> usize {
    2
}
fn default_imagen_model() -> String {
    "imagen-4.0-generate-001".to_string()
}
fn default_openai_image_model() -> String {
    "gpt-image-1".to_string()
}

pub fn create_image_client(config: &ImageConfig) -> Result<Arc<dyn ImageClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Imagen config missing")?;
            let key = resolve_api_key(&cfg.api_key, "GEMINI_API_KEY")?;
            Ok(Arc::new(ImagenClient::new(&key, &cfg.model)))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI image config missing")?;
            let key = resolve_api_key(&cfg.api_key, "OPENAI_API_KEY")?;
            Ok(Arc::new(OpenAIImageClient::new(&key, &cfg.model, cfg.base_url.as_deref())))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

fn decode_image(encoded: &str, mime_type: Option<&str>) -> Result<GeneratedImage> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .context("Image payload is not valid base64")?;
    if bytes.is_empty() {
        bail!("Image payload is empty");
    }
    Ok(GeneratedImage {
        bytes,
        mime_type: mime_type.unwrap_or("image/png").to_string(),
    })
}

// --- Imagen ---

#[derive(Debug)]
struct ImagenClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ImagenClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ImagenRequest {
    instances: Vec<ImagenInstance>,
    parameters: ImagenParameters,
}

#[derive(Serialize)]
struct ImagenInstance {
    prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenParameters {
    sample_count: u32,
    aspect_ratio: String,
}

#[derive(Deserialize)]
struct ImagenResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

fn imagen_image(response_text: &str) -> Result<GeneratedImage> {
    let result: ImagenResponse = serde_json::from_str(response_text)
        .map_err(|e| anyhow!("Failed to parse Imagen response: {}. Body: {}", e, response_text))?;

    let first = result
        .predictions
        .first()
        .ok_or_else(|| anyhow!("Imagen returned no predictions"))?;

    match &first.bytes_base64_encoded {
        Some(data) => decode_image(data, first.mime_type.as_deref()),
        None => {
            let reason = first.rai_filtered_reason.as_deref().unwrap_or("UNKNOWN");
            bail!("Imagen returned no image. Reason: {}", reason)
        }
    }
}

#[async_trait]
impl ImageClient for ImagenClient {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<GeneratedImage> {
        let mut url = endpoint(GEMINI_API_BASE, &format!("models/{}:predict", self.model))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let request_body = ImagenRequest {
            instances: vec![ImagenInstance { prompt: prompt.to_string() }],
            parameters: ImagenParameters {
                sample_count: 1,
                aspect_ratio: aspect_ratio.to_string(),
            },
        };

        let resp = self
            .client
            .post(url)
            .json(&request_body)
            .send()
            .await
            .context("Failed to reach Imagen")?;

        if !resp.status().is_success() {
            return Err(ApiError::from_response("Imagen", resp).await.into());
        }

        let response_text = resp.text().await?;
        imagen_image(&response_text)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIImageClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIImageClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// Closest size the images endpoint accepts for an aspect ratio.
fn openai_size(aspect_ratio: &str) -> &'static str {
    let Some((w, h)) = aspect_ratio.split_once(':') else {
        return "1024x1024";
    };
    match (w.trim().parse::<f32>(), h.trim().parse::<f32>()) {
        (Ok(w), Ok(h)) if h > 0.0 && w / h > 1.1 => "1536x1024",
        (Ok(w), Ok(h)) if h > 0.0 && w / h < 0.9 => "1024x1536",
        _ => "1024x1024",
    }
}

#[derive(Serialize)]
struct OpenAIImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
}

#[derive(Deserialize)]
struct OpenAIImageResponse {
    #[serde(default)]
    data: Vec<OpenAIImageData>,
}

#[derive(Deserialize)]
struct OpenAIImageData {
    b64_json: Option<String>,
}

fn openai_image(response_text: &str) -> Result<GeneratedImage> {
    let result: OpenAIImageResponse = serde_json::from_str(response_text)
        .map_err(|e| anyhow!("Failed to parse OpenAI image response: {}. Body: {}", e, response_text))?;
    let data = result
        .data
        .first()
        .and_then(|d| d.b64_json.as_deref())
        .ok_or_else(|| anyhow!("OpenAI image response empty or missing b64_json"))?;
    decode_image(data, Some("image/png"))
}

#[async_trait]
impl ImageClient for OpenAIImageClient {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<GeneratedImage> {
        let url = endpoint(&self.base_url, "images/generations")?;

        let request_body = OpenAIImageRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: openai_size(aspect_ratio).to_string(),
        };

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .context("Failed to reach OpenAI images")?;

        if !resp.status().is_success() {
            return Err(ApiError::from_response("OpenAI image", resp).await.into());
        }

        let response_text = resp.text().await?;
        openai_image(&response_text)
    }
}
