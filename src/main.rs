mod cli;
mod gateway;
mod gemini_client;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use eyre::{Result, WrapErr};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::cli::chat::context::SessionContext;
use crate::cli::insights::{DEFAULT_DASHBOARD_SUMMARY, print_insights};
use crate::gateway::AiGateway;
use crate::gemini_client::{GeminiClient, GeminiConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input to send to the chat
    #[arg(short, long)]
    input: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    gemini: GeminiArgs,
}

/// Overrides for the values read from the environment.
#[derive(Args)]
struct GeminiArgs {
    /// Gemini model id (env: NEXUS_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// API root URL (env: NEXUS_API_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Request timeout in seconds (env: NEXUS_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        /// Send a single message and print the reply
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Generate insights for dashboard figures
    Insights {
        /// Data summary to analyze; defaults to the sample dashboard figures
        #[arg(short, long)]
        summary: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("Failed to set tracing subscriber")?;

    info!("Starting Nexus AI chat");

    let config = GeminiConfig::from_env()?.with_overrides(
        cli.gemini.model,
        cli.gemini.base_url,
        cli.gemini.timeout_secs,
    )?;
    let client = GeminiClient::new(config)?;

    if !client.has_api_key() {
        warn!("No API key configured; set GEMINI_API_KEY or API_KEY to get real replies");
    }

    let session = SessionContext::new(client.model());
    let gateway: Arc<dyn AiGateway> = Arc::new(client);

    match cli.command {
        Some(Commands::Insights { summary }) => {
            let summary = summary.as_deref().unwrap_or(DEFAULT_DASHBOARD_SUMMARY);
            print_insights(&mut io::stdout(), gateway.as_ref(), summary).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Chat { input }) => run_chat(session, gateway, input).await,
        // Default to chat if no subcommand is provided
        None => run_chat(session, gateway, cli.input).await,
    }
}

async fn run_chat(
    session: SessionContext,
    gateway: Arc<dyn AiGateway>,
    input: Option<String>,
) -> Result<ExitCode> {
    let interactive = input.is_none();
    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        input,
        interactive,
        session,
        gateway,
    );
    chat_context.run().await
}
