use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::chat::{ChatSession, Dispatcher, RequestStatus};
use crate::config::{GenerationSettings, SettingsUpdate};
use crate::error::{ChatError, NewsError};
use crate::events::SessionEvent;
use crate::gemini::{GeminiModel, TextGenerator};
use crate::news::{NewsClient, NewsItem, NewsQuery, Topic};
use crate::render::{self, TurnView};

/// Everything the router needs besides the upstream clients.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    pub timeout: Duration,
    pub settings: GenerationSettings,
}

// Shared application state
#[derive(Clone)]
struct AppState {
    templates: Arc<AutoReloader>,
    // One interactive session per server process. Locked only to read or record
    // turns, never across the upstream call; the session's AwaitingResponse
    // status is what keeps a single request in flight.
    session: Arc<Mutex<ChatSession>>,
    dispatcher: Arc<Dispatcher>,
    news: Arc<NewsClient>,
    // Channel for broadcasting session events to all connected WebSocket clients
    broadcast_tx: broadcast::Sender<SessionEvent>,
}

#[derive(Debug, Serialize)]
struct TranscriptResponse {
    turns: Vec<TurnView>,
    message_count: usize,
    status: RequestStatus,
}

impl TranscriptResponse {
    fn from_session(session: &ChatSession) -> Self {
        Self {
            turns: render::views(session.transcript()),
            message_count: session.transcript().message_count(),
            status: session.status(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    transcript: TranscriptResponse,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NewsParams {
    topic: Option<String>,
    country: Option<String>,
    language: Option<String>,
    limit: Option<usize>,
    tz: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        // Create the loader *inside* the closure
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        // Watch the templates directory for changes
        notifier.watch_path(templates_dir.as_path(), true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    let session = state.session.lock().await;
    let models: Vec<&str> = GeminiModel::ALL.iter().map(|m| m.api_name()).collect();
    let context = minijinja::context! {
        title => "MindSeek - AI Chat Assistant",
        turns => render::views(session.transcript()),
        message_count => session.transcript().message_count(),
        settings => session.settings(),
        models => models,
        topics => Topic::ALL.iter().map(|t| t.label()).collect::<Vec<_>>(),
    };
    drop(session);

    // Acquire env, get template, and render within the same block
    state
        .templates
        .acquire_env()
        .and_then(|env| env.get_template("index.html").and_then(|tmpl| tmpl.render(context)))
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            Html(format!("Internal Server Error: {}", e))
        })
}

async fn transcript_handler(State(state): State<AppState>) -> Json<TranscriptResponse> {
    let session = state.session.lock().await;
    Json(TranscriptResponse::from_session(&session))
}

async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let generation = {
        let mut session = state.session.lock().await;
        let settings = session.settings().clone();
        match state.dispatcher.begin(&mut session, &request.prompt, &settings) {
            Ok(generation) => generation,
            Err(e) if e.is_silent() => return StatusCode::NO_CONTENT.into_response(),
            Err(e @ ChatError::Busy) => {
                warn!("Rejecting prompt while another request is in flight");
                return error_response(StatusCode::CONFLICT, e.to_string());
            }
            Err(e) => {
                error!("Unexpected chat failure: {}", e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }
    };

    // Runs to completion even if the client goes away, so the session always
    // leaves AwaitingResponse.
    let dispatcher = state.dispatcher.clone();
    let session = state.session.clone();
    let exchange = tokio::spawn(async move {
        let outcome = dispatcher.call(&generation).await;
        let mut session = session.lock().await;
        let result = dispatcher.finish(&mut session, outcome);
        (result, TranscriptResponse::from_session(&session))
    });

    match exchange.await {
        Ok((Ok(reply), transcript)) => Json(ChatResponse {
            reply: Some(reply),
            error: None,
            transcript,
        })
        .into_response(),
        Ok((Err(e @ ChatError::Upstream(_)), transcript)) => (
            StatusCode::BAD_GATEWAY,
            Json(ChatResponse {
                reply: None,
                error: Some(e.to_string()),
                transcript,
            }),
        )
            .into_response(),
        Ok((Err(e), _)) => {
            error!("Unexpected chat failure: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("Chat task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "chat request did not complete")
        }
    }
}

async fn clear_handler(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    match state.dispatcher.clear(&mut session) {
        Ok(()) => {
            info!("Chat history cleared");
            Json(TranscriptResponse::from_session(&session)).into_response()
        }
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn get_settings_handler(State(state): State<AppState>) -> Json<GenerationSettings> {
    let session = state.session.lock().await;
    Json(session.settings().clone())
}

async fn put_settings_handler(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    let mut session = state.session.lock().await;
    match state.dispatcher.update_settings(&mut session, &update) {
        Ok(settings) => {
            info!(model = %settings.model(), temperature = settings.temperature(), "Settings updated");
            Json(settings).into_response()
        }
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn models_handler(State(state): State<AppState>) -> Response {
    match state.dispatcher.generator().list_models().await {
        Ok(models) => Json(ModelsResponse { models }).into_response(),
        Err(e) => {
            error!("Error listing models: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn news_handler(State(state): State<AppState>, Query(params): Query<NewsParams>) -> Response {
    let defaults = NewsQuery::default();
    let query = params
        .topic
        .as_deref()
        .unwrap_or_default()
        .parse::<Topic>()
        .and_then(|topic| {
            NewsQuery::new(
                topic,
                params.country.as_deref().unwrap_or(&defaults.country),
                params.language.as_deref().unwrap_or(&defaults.language),
                params.limit.unwrap_or(defaults.limit),
                params.tz.as_deref().unwrap_or("UTC"),
            )
        });
    let query = match query {
        Ok(query) => query,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.news.fetch(&query).await {
        Ok(items) => Json::<Vec<NewsItem>>(items).into_response(),
        Err(e @ NewsError::InvalidQuery(_)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            warn!("News fetch failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Forward session events to one client until it goes away
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut broadcast_rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = broadcast_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged behind session events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match serde_json::to_string(&event) {
                    Ok(json_msg) => {
                        if sender.send(Message::Text(json_msg)).await.is_err() {
                            warn!("WebSocket client disconnected or send error. Closing connection.");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize session event: {}", e),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Prompts go through POST /api/chat; the socket is push-only.
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    info!("WebSocket connection closed");
}

/// Builds the application router around one chat session.
pub fn router(generator: Arc<dyn TextGenerator>, news: NewsClient, config: WebConfig) -> Router {
    // Create a broadcast channel for WebSocket messages
    let (broadcast_tx, _) = broadcast::channel::<SessionEvent>(100);
    let dispatcher = Dispatcher::new(generator, config.timeout).with_events(broadcast_tx.clone());

    let state = AppState {
        templates: Arc::new(create_minijinja_env(config.templates_dir)),
        session: Arc::new(Mutex::new(ChatSession::new(config.settings))),
        dispatcher: Arc::new(dispatcher),
        news: Arc::new(news),
        broadcast_tx,
    };

    // Serve static files from the configured directory
    let static_files_service = ServeDir::new(config.static_dir).not_found_service(
        tower::service_fn(|_req: Request| async {
            Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        }),
    );

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/transcript", get(transcript_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/clear", post(clear_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route("/api/models", get(models_handler))
        .route("/api/news", get(news_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(address: &str, port: u16, app: Router) -> Result<()> {
    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind((address, port))
        .await
        .context(format!("Failed to bind to address {}:{}", address, port))?;
    info!("Web server listening on http://{}", listener.local_addr()?);

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
