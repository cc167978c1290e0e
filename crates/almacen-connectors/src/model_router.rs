//! Model Router: sends the assembled prompt to the completion service (mock or live Gemini API)
//! and returns the generated text, whole or as a stream of chunks.

use almacen_core::CoreConfig;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ENV_LLM_API_KEY: &str = "ALMACEN_LLM_API_KEY";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MOCK_CHUNK_DELAY: Duration = Duration::from_millis(5);
const PREVIEW_CHARS: usize = 80;

/// Mode for LLM invocation: mock (deterministic simulated text) or live (Gemini API).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LlmMode {
    #[default]
    Mock,
    Live,
}

impl LlmMode {
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("live") {
            LlmMode::Live
        } else {
            LlmMode::Mock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMode::Mock => "mock",
            LlmMode::Live => "live",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("no API key configured (set ALMACEN_LLM_API_KEY)")]
    MissingApiKey,

    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("completion stream interrupted: {0}")]
    StreamInterrupted(String),
}

/// Receiving end of a streamed completion. An `Err` item is final: the stream broke after
/// some chunks had already been delivered.
pub type CompletionStream = mpsc::Receiver<Result<String, CompletionError>>;

/// One completion call: system instructions plus the user-facing prompt.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_instructions: String,
    pub prompt: String,
    /// Reasoning budget; only sent when > 0.
    pub thinking_budget: u32,
    pub search_grounding: bool,
}

impl CompletionRequest {
    pub fn new(system_instructions: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_instructions: system_instructions.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: &CoreConfig, prompt: impl Into<String>) -> Self {
        Self {
            system_instructions: config.system_instructions.clone(),
            prompt: prompt.into(),
            thinking_budget: config.thinking_budget,
            search_grounding: config.search_grounding,
        }
    }

    /// Gemini `generateContent` request body.
    pub fn to_gemini_body(&self) -> Value {
        let mut body = json!({
            "systemInstruction": { "parts": [{ "text": self.system_instructions }] },
            "contents": [{ "role": "user", "parts": [{ "text": self.prompt }] }],
        });
        if self.thinking_budget > 0 {
            body["generationConfig"] = json!({
                "thinkingConfig": { "thinkingBudget": self.thinking_budget }
            });
        }
        if self.search_grounding {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }
        body
    }
}

/// Routes prompts to a mock generator or the live completion API.
pub struct ModelRouter {
    mode: LlmMode,
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::with_mode(LlmMode::Mock)
    }

    pub fn with_mode(mode: LlmMode) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            mode,
            model: CoreConfig::default().model,
            api_key: std::env::var(ENV_LLM_API_KEY).ok().filter(|k| !k.is_empty()),
            base_url: GEMINI_BASE_URL.to_string(),
            client,
        }
    }

    /// Mode and model from config; API key from `ALMACEN_LLM_API_KEY`.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::with_mode(LlmMode::from_config(&config.llm_mode)).with_model(config.model.clone())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn mode(&self) -> LlmMode {
        self.mode
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full completion text.
    pub async fn generate(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match self.mode {
            LlmMode::Mock => Ok(mock_generate(&request.prompt)),
            LlmMode::Live => self.live_generate(request).await,
        }
    }

    /// Streams completion text as incremental chunks. Connection and HTTP errors surface here;
    /// a failure after the response started arrives as the last item of the stream.
    pub async fn stream_generate(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        match self.mode {
            LlmMode::Mock => Ok(mock_stream_generate(&request.prompt)),
            LlmMode::Live => self.live_stream_generate(request).await,
        }
    }

    fn api_key(&self) -> Result<&str, CompletionError> {
        self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)
    }

    async fn post(&self, url: String, request: &CompletionRequest) -> Result<reqwest::Response, CompletionError> {
        let key = self.api_key()?;
        tracing::info!(
            target: "almacen::model",
            model = %self.model,
            prompt_chars = request.prompt.chars().count(),
            "Sending completion request"
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", key)
            .json(&request.to_gemini_body())
            .send()
            .await
            .map_err(|e| CompletionError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::HttpStatus { status, body });
        }
        Ok(response)
    }

    async fn live_generate(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self.post(url, request).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
        extract_text(&value).ok_or_else(|| CompletionError::InvalidResponse("no candidate text".to_string()))
    }

    async fn live_stream_generate(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model);
        let response = self.post(url, request).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(target: "almacen::model", error = %e, "Completion stream interrupted");
                        let _ = tx.send(Err(CompletionError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                for payload in drain_sse_data(&mut buffer) {
                    let Ok(value) = serde_json::from_str::<Value>(&payload) else {
                        continue;
                    };
                    if let Some(text) = extract_text(&value) {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock LLM: deterministic text echoing the last line of the prompt (the user question).
pub fn mock_generate(prompt: &str) -> String {
    let question = prompt
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim();
    let mut preview: String = question.chars().take(PREVIEW_CHARS).collect();
    if question.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    format!(
        "[Generated – Mock LLM]\n\nConsulta recibida ({}). Respuesta simulada a partir de {} caracteres de contexto.",
        preview,
        prompt.chars().count()
    )
}

/// Mock streaming: the mock text sent word by word.
pub fn mock_stream_generate(prompt: &str) -> CompletionStream {
    let text = mock_generate(prompt);
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        for word in text.split_inclusive(' ') {
            if tx.send(Ok(word.to_string())).await.is_err() {
                break;
            }
            tokio::time::sleep(MOCK_CHUNK_DELAY).await;
        }
    });
    rx
}

/// Concatenated text of the first candidate's parts.
fn extract_text(value: &Value) -> Option<String> {
    let parts = value["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Removes complete lines from `buffer` and returns the payloads of `data:` lines.
/// Only whole lines are decoded, so a character split across network chunks stays intact.
fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim_start();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}
