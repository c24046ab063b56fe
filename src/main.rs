//! Quiz Bot - Main Entry Point
//!
//! A Telegram bot that turns uploaded text files into quiz polls, with
//! tiered access control and owner broadcasts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use quiz_bot::access::AccessResolver;
use quiz_bot::broadcast::{BroadcastEngine, BroadcastPayload, SendPort, Sleeper, TokioSleeper};
use quiz_bot::commands::CommandHandler;
use quiz_bot::config::{BotSettings, TelegramConfig};
use quiz_bot::store::{JsonStore, Store, TOKENS};
use quiz_bot::telegram::{InboundMessage, TelegramGate};

/// Uploaded documents above this size are rejected unread.
const MAX_DOCUMENT_BYTES: i64 = 512 * 1024;

/// Telegram quiz bot.
#[derive(Parser, Debug)]
#[command(name = "quiz_bot")]
#[command(about = "Turn text files into Telegram quiz polls")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let settings = BotSettings::from_env().context("Failed to load bot settings")?;

    let store = JsonStore::open(&settings.store_path)
        .context("Failed to open the store file")?
        .with_ttl(TOKENS, "expires_at");
    let store: Arc<dyn Store> = Arc::new(store);
    info!("Store ready at {}", settings.store_path.display());

    let gate = Arc::new(
        TelegramGate::connect(&tg_config)
            .await
            .context("Failed to connect to Telegram")?,
    );

    let port: Arc<dyn SendPort> = Arc::clone(&gate) as Arc<dyn SendPort>;
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);

    let engine = BroadcastEngine::new(Arc::clone(&port), Arc::clone(&sleeper))
        .with_pace(Duration::from_millis(settings.broadcast_pace_ms));

    let resolver = Arc::new(AccessResolver::new(Arc::clone(&store), settings.owner_id));

    let handler = Arc::new(CommandHandler::new(
        resolver,
        store,
        port,
        sleeper,
        engine,
        settings.owner_id,
    ));

    info!("Bot is running. Use Ctrl+C to stop.");

    tokio::select! {
        result = run_updates(Arc::clone(&gate), handler) => {
            result.context("Update loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    gate.disconnect();
    Ok(())
}

/// Pulls inbound messages forever, dispatching each one on its own
/// task so a long broadcast never blocks `/cancel`.
async fn run_updates(gate: Arc<TelegramGate>, handler: Arc<CommandHandler>) -> Result<()> {
    while let Some(message) = gate.next_inbound().await {
        let gate = Arc::clone(&gate);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let from = message.from;
            if let Err(e) = dispatch(gate, handler, message).await {
                warn!("Failed to handle message from {}: {e:#}", from);
            }
        });
    }
    anyhow::bail!("Update stream closed")
}

/// Routes one inbound message: document uploads become quizzes,
/// commands go through the handler, everything else is ignored.
async fn dispatch(
    gate: Arc<TelegramGate>,
    handler: Arc<CommandHandler>,
    message: InboundMessage,
) -> Result<()> {
    let from = message.from;
    let username = message.username.as_deref();
    let first_name = message.first_name.as_deref();

    if let Some(document) = &message.document {
        if document.size > MAX_DOCUMENT_BYTES {
            gate.send_message(from, "That file is too large for a quiz.")
                .await?;
            return Ok(());
        }

        let bytes = gate
            .download_document(document)
            .await
            .context("Failed to download the document")?;
        let Ok(content) = String::from_utf8(bytes) else {
            gate.send_message(from, "Quiz files must be plain UTF-8 text.")
                .await?;
            return Ok(());
        };

        let result = handler
            .handle_document(from, username, first_name, &content)
            .await;
        gate.send_message(from, &result.message).await?;
        return Ok(());
    }

    if message.text.is_empty() {
        return Ok(());
    }

    // Only /broadcast needs the replied-to message; fetch it lazily.
    let reply = match (first_word_is(&message.text, "/broadcast"), message.reply_to) {
        (true, Some(reply_id)) => gate
            .fetch_message_text(reply_id)
            .await
            .context("Failed to fetch the replied-to message")?
            .map(|(id, text)| BroadcastPayload {
                text,
                origin_message_id: Some(id),
            }),
        _ => None,
    };

    if let Some(result) = handler
        .try_handle(from, username, first_name, &message.text, reply)
        .await
    {
        gate.send_message(from, &result.message).await?;
    }

    Ok(())
}

fn first_word_is(text: &str, command: &str) -> bool {
    text.split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case(command))
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
