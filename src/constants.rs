// Defaults, optionally overridden from the environment (or a .env file loaded in main).

use std::env;

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Summaries in the news feed are cut to this many characters.
pub const NEWS_SUMMARY_MAX_CHARS: usize = 300;
pub const NEWS_DEFAULT_LIMIT: usize = 8;

// Use lazy_static to initialize env-derived statics safely.
lazy_static::lazy_static! {
    pub static ref GEMINI_API_URL: String = env::var("GEMINI_API_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref NEWS_FEED_URL: String = env::var("MINDSEEK_NEWS_URL")
        .unwrap_or_else(|_| "https://news.google.com".to_string());
    pub static ref SERVER_ADDRESS: String = env::var("MINDSEEK_SERVER_ADDRESS")
        .unwrap_or_else(|_| "localhost".to_string());
    pub static ref SERVER_PORT: u16 = env::var("MINDSEEK_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8501);
    pub static ref REQUEST_TIMEOUT_SECS: u64 = env::var("MINDSEEK_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
    pub static ref TEMPLATES_DIR: String = env::var("MINDSEEK_TEMPLATES_DIR")
        .unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("MINDSEEK_STATIC_DIR")
        .unwrap_or_else(|_| "static".to_string());
}
