use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Model,
}

/// One message of a conversation with the text model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            gemini: Some(GeminiConfig::default()),
            ollama: None,
            openai: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    /// Falls back to `GEMINI_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_gemini_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    /// Falls back to `OPENAI_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_retry_count() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    5
}
fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Returns the configured key, or the value of `env_var` when none is set.
pub fn resolve_api_key(configured: &str, env_var: &str) -> Result<String> {
    if !configured.trim().is_empty() {
        return Ok(configured.trim().to_string());
    }
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => bail!("No API key configured and {} is not set", env_var),
    }
}

/// Joins `path` onto `base` as a child, whether or not `base` ends with '/'.
pub fn endpoint(base: &str, path: &str) -> Result<Url> {
    let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))
        .with_context(|| format!("Invalid base URL: {}", base))?;
    base.join(path.trim_start_matches('/'))
        .with_context(|| format!("Invalid endpoint path: {}", path))
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            let key = resolve_api_key(&cfg.api_key, "GEMINI_API_KEY")?;
            Ok(Arc::new(GeminiClient::new(&key, &cfg.model)))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Ok(Arc::new(OllamaClient::new(&cfg.base_url, &cfg.model)))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            let key = resolve_api_key(&cfg.api_key, "OPENAI_API_KEY")?;
            Ok(Arc::new(OpenAIClient::new(&key, &cfg.model, cfg.base_url.as_deref())))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

/// A non-success HTTP response from a model API.
#[derive(Debug)]
pub struct ApiError {
    pub service: &'static str,
    pub status: u16,
    pub body: String,
}

impl ApiError {
    pub async fn from_response(service: &'static str, resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Self { service, status, body }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self.status {
            429 => Some("rate limit reached, wait a minute or check your quota"),
            503 => Some("the service is overloaded, try again later"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} API error (HTTP {}): {}", self.service, self.status, self.body)
    }
}

impl std::error::Error for ApiError {}

/// Calls `llm.chat`, retrying `retry_count` more times on failure.
pub async fn chat_with_retry(
    llm: &dyn LlmClient,
    config: &LlmConfig,
    system: &str,
    turns: &[ChatTurn],
) -> Result<String> {
    let mut attempt = 0;
    loop {
        match llm.chat(system, turns).await {
            Ok(text) => return Ok(text),
            Err(e) if attempt < config.retry_count => {
                attempt += 1;
                warn!(
                    "LLM request failed ({}), retry {}/{} in {}s",
                    e, attempt, config.retry_count, config.retry_delay_seconds
                );
                tokio::time::sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
            Err(e) => {
                let mut message = format!("LLM request failed after {} attempts", attempt + 1);
                if let Some(api) = e.downcast_ref::<ApiError>() {
                    message.push_str(&format!(" (HTTP {}", api.status));
                    if let Some(hint) = api.hint() {
                        message.push_str(&format!(": {}", hint));
                    }
                    message.push(')');
                }
                return Err(e.context(message));
            }
        }
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn gemini_request(system: &str, turns: &[ChatTurn]) -> GeminiRequest {
    GeminiRequest {
        contents: turns
            .iter()
            .map(|t| GeminiContent {
                role: match t.role {
                    Role::User => "user",
                    Role::Model => "model",
                }
                .to_string(),
                parts: vec![GeminiPart { text: t.text.clone() }],
            })
            .collect(),
        system_instruction: (!system.is_empty()).then(|| GeminiSystemInstruction {
            parts: vec![GeminiPart { text: system.to_string() }],
        }),
    }
}

fn gemini_text(response_text: &str) -> Result<String> {
    let result: GeminiResponse = serde_json::from_str(response_text).map_err(|e| {
        anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
    })?;

    if let Some(err) = result.error {
        bail!("Gemini API returned error: {}", err.message);
    }

    let first = result
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow!("Gemini response format unexpected or empty. Body: {}", response_text))?;

    let text: String = first
        .content
        .as_ref()
        .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
        .unwrap_or_default();
    if text.is_empty() {
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        bail!("Gemini response empty. Finish reason: {}", reason);
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String> {
        let mut url = endpoint(GEMINI_API_BASE, &format!("models/{}:generateContent", self.model))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let resp = self
            .client
            .post(url)
            .json(&gemini_request(system, turns))
            .send()
            .await
            .context("Failed to reach Gemini")?;

        if !resp.status().is_success() {
            return Err(ApiError::from_response("Gemini", resp).await.into());
        }

        let response_text = resp.text().await?;
        gemini_text(&response_text)
    }
}

// --- OpenAI-style messages, shared by Ollama and OpenAI ---

#[derive(Serialize, Debug, PartialEq)]
struct ChatMessage {
    role: String,
    content: String,
}

fn chat_messages(system: &str, turns: &[ChatTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system.is_empty() {
        messages.push(ChatMessage { role: "system".to_string(), content: system.to_string() });
    }
    messages.extend(turns.iter().map(|t| ChatMessage {
        role: match t.role {
            Role::User => "user",
            Role::Model => "assistant",
        }
        .to_string(),
        content: t.text.clone(),
    }));
    messages
}

// --- Ollama ---
#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String> {
        let url = endpoint(&self.base_url, "api/chat")?;

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: chat_messages(system, turns),
            stream: false,
        };

        let resp = self
            .client
            .post(url)
            .json(&request_body)
            .send()
            .await
            .context("Failed to reach Ollama")?;

        if !resp.status().is_success() {
            return Err(ApiError::from_response("Ollama", resp).await.into());
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String> {
        let url = endpoint(&self.base_url, "chat/completions")?;

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: chat_messages(system, turns),
        };

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .context("Failed to reach OpenAI")?;

        if !resp.status().is_success() {
            return Err(ApiError::from_response("OpenAI", resp).await.into());
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}
