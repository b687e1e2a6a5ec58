pub mod chat;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod gemini;
pub mod news;
pub mod render;
pub mod transcript;
pub mod web_server;

pub use chat::{ChatSession, Dispatcher, RequestStatus};
pub use config::{AppConfig, GenerationSettings};
pub use error::{ChatError, NewsError, UpstreamError};
pub use gemini::{GeminiClient, GeminiModel, GenerationRequest, TextGenerator};
pub use transcript::{Role, Transcript, Turn, TurnId};
