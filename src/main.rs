use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use mindseek::chat::{self, ChatSession, Dispatcher, ReplOptions};
use mindseek::config::{AppConfig, GenerationSettings};
use mindseek::constants;
use mindseek::error::ChatError;
use mindseek::gemini::{GeminiClient, GeminiModel, TextGenerator};
use mindseek::news::{NewsClient, NewsQuery, Topic};
use mindseek::web_server::{self, WebConfig};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Google Gemini API key.
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Base URL of the Gemini REST API.
    #[arg(long, global = true, default_value_t = constants::GEMINI_API_URL.clone())]
    api_url: String,

    /// Seconds to wait for the AI service before giving up.
    #[arg(
        long,
        global = true,
        default_value_t = *constants::REQUEST_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct GenerationArgs {
    /// Model to use: gemini-2.5-flash, gemini-2.0-flash, gemini-1.5-flash or gemini-1.5-pro.
    #[arg(long, default_value_t = GeminiModel::default())]
    model: GeminiModel,

    /// Creativity level, 0.0 (focused) to 1.0 (creative).
    #[arg(long, default_value_t = constants::DEFAULT_TEMPERATURE)]
    temperature: f32,

    #[arg(long, default_value_t = constants::DEFAULT_MAX_OUTPUT_TOKENS)]
    max_output_tokens: u32,
}

impl GenerationArgs {
    fn into_settings(self) -> Result<GenerationSettings, ChatError> {
        GenerationSettings::new(self.model, self.max_output_tokens, self.temperature)
    }
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the MindSeek web UI.
    Serve {
        #[arg(long, default_value_t = constants::SERVER_ADDRESS.clone(), help = "Address to bind the web server to.")]
        address: String,
        #[arg(long, default_value_t = *constants::SERVER_PORT, help = "Port for the web server.")]
        port: u16,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Chat with MindSeek in the terminal.
    Chat {
        #[command(flatten)]
        generation: GenerationArgs,
        #[arg(long, help = "Print replies at once instead of typing them out.")]
        no_typing: bool,
    },
    /// List the models available to this API key.
    Models,
    /// Show Google News headlines.
    News {
        #[arg(long, default_value = "Top stories")]
        topic: Topic,
        #[arg(long, default_value = "US")]
        country: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long, default_value_t = constants::NEWS_DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long, default_value = "UTC", help = "IANA timezone for publish times, e.g. US/Pacific.")]
        tz: String,
    },
}

/// Loads the credential or stops before accepting any input.
fn require_config(api_key: Option<String>, api_url: &str, timeout: Duration) -> AppConfig {
    match AppConfig::new(api_key, api_url, timeout) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: missing API key");
            eprintln!("{}", e);
            std::process::exit(2);
        }
    }
}

fn gemini_client(config: &AppConfig) -> Result<Arc<dyn TextGenerator>> {
    let client = GeminiClient::new(config).context("Failed to build Gemini HTTP client")?;
    Ok(Arc::new(client))
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GOOGLE_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,mindseek=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        api_key,
        api_url,
        timeout_secs,
        command,
    } = Cli::parse();
    let timeout = Duration::from_secs(timeout_secs);

    info!("MindSeek starting with command: {:?}", command);

    match command {
        Commands::Serve {
            address,
            port,
            generation,
        } => {
            let config = require_config(api_key, &api_url, timeout);
            let settings = generation.into_settings()?;
            let news = NewsClient::new(constants::NEWS_FEED_URL.as_str(), timeout)
                .context("Failed to build news HTTP client")?;

            let app = web_server::router(
                gemini_client(&config)?,
                news,
                WebConfig {
                    templates_dir: PathBuf::from(constants::TEMPLATES_DIR.as_str()),
                    static_dir: PathBuf::from(constants::STATIC_DIR.as_str()),
                    timeout,
                    settings,
                },
            );

            info!("Starting MindSeek web UI on {}:{}...", address, port);
            tokio::select! {
                res = web_server::start_web_server(&address, port, app) => res?,
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down..."),
            }
            info!("Shutdown complete.");
        }
        Commands::Chat {
            generation,
            no_typing,
        } => {
            let config = require_config(api_key, &api_url, timeout);
            let settings = generation.into_settings()?;
            let dispatcher = Dispatcher::new(gemini_client(&config)?, timeout);
            let mut session = ChatSession::new(settings);
            let options = ReplOptions {
                typing: !no_typing,
                ..Default::default()
            };

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            chat::run_interactive_chat(&dispatcher, &mut session, stdin, &mut stdout, &options)
                .await
                .context("Chat session failed")?;
        }
        Commands::Models => {
            let config = require_config(api_key, &api_url, timeout);
            let models = gemini_client(&config)?
                .list_models()
                .await
                .context("Error listing models")?;
            for model in models {
                println!("{}", model);
            }
        }
        Commands::News {
            topic,
            country,
            language,
            limit,
            tz,
        } => {
            let query = NewsQuery::new(topic, &country, &language, limit, &tz)?;
            let client = NewsClient::new(constants::NEWS_FEED_URL.as_str(), timeout)
                .context("Failed to build news HTTP client")?;
            let items = client.fetch(&query).await.context("Failed to fetch news")?;

            if items.is_empty() {
                println!("No news found for {}.", query.topic);
            }
            for item in items {
                println!("{}", item.title);
                if !item.source.is_empty() || !item.time.is_empty() {
                    println!("  {} {}", item.source, item.time);
                }
                if !item.summary.is_empty() {
                    println!("  {}", item.summary);
                }
                println!("  {}\n", item.link);
            }
        }
    }

    Ok(())
}
