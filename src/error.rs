use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors from the remote text-generation service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport/HTTP client error.
    #[error("could not reach the AI service: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-successful HTTP status from upstream.
    #[error("the AI service returned HTTP {status}: {message}")]
    HttpStatus { status: StatusCode, message: String },

    /// Unexpected/invalid JSON response.
    #[error("could not decode the AI service response: {0}")]
    Decode(String),

    /// The prompt was rejected by the upstream safety filters.
    #[error("the prompt was blocked by the AI service ({0})")]
    Blocked(String),

    /// 2xx response without any usable text.
    #[error("Sorry, I couldn't generate a response. Please try again.")]
    EmptyResponse,

    #[error("the AI service did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Everything the chat path can surface to the user.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Required credential missing. Raised once at startup.
    #[error("{0}")]
    Configuration(String),

    /// Prompt was empty or whitespace only. Nothing was recorded or sent.
    #[error("the prompt is empty")]
    EmptyInput,

    /// Another request for this session is still awaiting its response.
    #[error("a request is already in progress for this session")]
    Busy,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ChatError {
    /// True for errors callers should drop without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, ChatError::EmptyInput)
    }
}

/// Errors from the news feed collaborator.
#[derive(Debug, Error)]
pub enum NewsError {
    #[error("invalid news query: {0}")]
    InvalidQuery(String),

    #[error("failed to fetch news feed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("news feed returned HTTP {0}")]
    HttpStatus(StatusCode),

    #[error("failed to parse news feed: {0}")]
    Parse(String),
}
