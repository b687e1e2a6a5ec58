//! Google Gemini client for text generation.
//!
//! Thin wrapper around the Generative Language REST API:
//! - `POST {base}/v1beta/models/{model}:generateContent`: single-shot generation
//! - `GET  {base}/v1beta/models`: model listing, used by the debug commands
//!
//! The dispatcher only sees the [`TextGenerator`] trait, so tests can swap the
//! network for a stub.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::AppConfig;
use crate::error::{ChatError, UpstreamError};

/// Models the settings selector offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiModel {
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    Gemini25Flash,
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
    #[serde(rename = "gemini-1.5-flash")]
    Gemini15Flash,
    #[serde(rename = "gemini-1.5-pro")]
    Gemini15Pro,
}

impl GeminiModel {
    pub const ALL: [GeminiModel; 4] = [
        GeminiModel::Gemini25Flash,
        GeminiModel::Gemini20Flash,
        GeminiModel::Gemini15Flash,
        GeminiModel::Gemini15Pro,
    ];

    pub fn api_name(self) -> &'static str {
        match self {
            GeminiModel::Gemini25Flash => "gemini-2.5-flash",
            GeminiModel::Gemini20Flash => "gemini-2.0-flash",
            GeminiModel::Gemini15Flash => "gemini-1.5-flash",
            GeminiModel::Gemini15Pro => "gemini-1.5-pro",
        }
    }
}

impl fmt::Display for GeminiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for GeminiModel {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        GeminiModel::ALL
            .into_iter()
            .find(|m| m.api_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let allowed: Vec<&str> = GeminiModel::ALL.iter().map(|m| m.api_name()).collect();
                ChatError::InvalidSettings(format!(
                    "unknown model '{}', expected one of: {}",
                    wanted,
                    allowed.join(", ")
                ))
            })
    }
}

/// One outbound generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: GeminiModel,
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the generated text. Empty text is an error, never `Ok("")`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError>;

    async fn list_models(&self) -> Result<Vec<String>, UpstreamError>;
}

// Wire format for generateContent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for the Gemini REST API. Build once, reuse per request.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            api_key: config.api_key().to_string(),
            base_url: config.api_url().to_string(),
            timeout: config.timeout(),
        })
    }

    fn generate_url(&self, model: GeminiModel) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model.api_name())
    }

    fn map_send_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(e)
        }
    }

    /// Reads the body and turns non-2xx statuses into [`UpstreamError::HttpStatus`].
    async fn read_body(&self, response: reqwest::Response) -> Result<String, UpstreamError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            let message = error_message(&body);
            error!(%status, %message, "Gemini API request failed");
            return Err(UpstreamError::HttpStatus { status, message });
        }
        Ok(body)
    }
}

/// Prefers the structured `error.message`, falling back to a body snippet.
fn error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let snippet: String = body.trim().chars().take(200).collect();
    if snippet.is_empty() {
        "no error details provided".to_string()
    } else {
        snippet
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, UpstreamError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(UpstreamError::Blocked(reason));
        }
        return Err(UpstreamError::EmptyResponse);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        debug!(finish_reason = ?candidate.finish_reason, "Candidate carried no text");
        return Err(UpstreamError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
        let payload = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &request.prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
            },
        };

        let url = self.generate_url(request.model);
        debug!(%url, "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let body = self.read_body(response).await?;
        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let text = extract_text(parsed)?;
        debug!(chars = text.chars().count(), "Received Gemini response");
        Ok(text)
    }

    #[instrument(skip(self))]
    async fn list_models(&self) -> Result<Vec<String>, UpstreamError> {
        let url = format!("{}/v1beta/models", self.base_url);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        // Follow nextPageToken until the listing is exhausted.
        loop {
            let mut request = self.client.get(&url).header("x-goog-api-key", &self.api_key);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request.send().await.map_err(|e| self.map_send_error(e))?;

            let body = self.read_body(response).await?;
            let parsed: ListModelsResponse =
                serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

            names.extend(
                parsed
                    .models
                    .into_iter()
                    .map(|m| m.name.trim_start_matches("models/").to_string()),
            );

            match parsed.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    debug!(fetched = names.len(), "Fetching next page of models");
                    page_token = Some(token);
                }
                None => break,
            }
        }

        Ok(names)
    }
}
