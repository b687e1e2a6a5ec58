use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::ChatError;
use crate::gemini::GeminiModel;

pub const MISSING_API_KEY_MESSAGE: &str = "API key missing! MindSeek needs a Google Gemini API key to work.

To fix this, either:
  - export GOOGLE_API_KEY=your_key_here
  - or create a .env file containing GOOGLE_API_KEY=your_key_here

Keys are available from Google AI Studio: https://aistudio.google.com/";

/// Process-wide settings fixed at startup.
#[derive(Clone)]
pub struct AppConfig {
    api_key: String,
    api_url: String,
    timeout: Duration,
}

impl AppConfig {
    /// Fails closed when the credential is absent or blank.
    pub fn new(
        api_key: Option<String>,
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let api_key = match api_key.map(|k| k.trim().to_string()) {
            Some(key) if !key.is_empty() => key,
            _ => return Err(ChatError::Configuration(MISSING_API_KEY_MESSAGE.to_string())),
        };

        Ok(Self {
            api_key,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// Keep the key out of logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Per-request generation parameters. May change between requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSettings {
    model: GeminiModel,
    max_output_tokens: u32,
    temperature: f32,
}

impl GenerationSettings {
    pub fn new(model: GeminiModel, max_output_tokens: u32, temperature: f32) -> Result<Self, ChatError> {
        if max_output_tokens == 0 {
            return Err(ChatError::InvalidSettings(
                "max_output_tokens must be a positive integer".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ChatError::InvalidSettings(format!(
                "temperature must be between 0.0 and 1.0, got {}",
                temperature
            )));
        }
        Ok(Self {
            model,
            max_output_tokens,
            temperature,
        })
    }

    pub fn model(&self) -> GeminiModel {
        self.model
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Applies a partial update, validating the merged result.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Self, ChatError> {
        let model = match &update.model {
            Some(name) => name.parse::<GeminiModel>()?,
            None => self.model,
        };
        Self::new(
            model,
            update.max_output_tokens.unwrap_or(self.max_output_tokens),
            update.temperature.unwrap_or(self.temperature),
        )
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: GeminiModel::default(),
            max_output_tokens: constants::DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: constants::DEFAULT_TEMPERATURE,
        }
    }
}

/// Partial settings change coming from the settings selector.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub model: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}
