//! Recap Bot
//!
//! Records every message it sees and answers `/recap [n]` with the last `n`
//! messages of the chat. Long recaps are split into numbered pages. The last
//! page carries a "Refresh" button handled by a callback query handler.
//!
//! # Usage
//!
//! ```bash
//! TGDISPATCH_BOT__TOKEN=123456:ABC cargo run --package recap-bot
//! cargo run --package recap-bot -- --config ./tgdispatch.toml --profile production
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tgdispatch::core::parse_command;
use tgdispatch::prelude::*;
use tokio::sync::RwLock;
use tracing::{info, warn};

const DEFAULT_RECAP: usize = 20;
const MAX_RECAP: usize = 200;
const HISTORY_PER_CHAT: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "recap-bot", about = "Chat recap bot")]
struct Args {
    /// Configuration file; searched for in the usual places when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(short, long)]
    profile: Option<String>,
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: i64,
    author: String,
    text: String,
}

/// Keeps the most recent messages of every chat in memory.
#[derive(Default)]
struct InMemoryHistory {
    chats: RwLock<HashMap<ChatId, Vec<StoredMessage>>>,
}

impl InMemoryHistory {
    async fn recent(&self, chat_id: ChatId, count: usize) -> Vec<StoredMessage> {
        let chats = self.chats.read().await;
        chats
            .get(&chat_id)
            .map(|messages| messages[messages.len().saturating_sub(count)..].to_vec())
            .unwrap_or_default()
    }
}

fn author(message: &MessageEvent) -> String {
    match &message.sender {
        Some(Sender {
            username: Some(name),
            ..
        }) => format!("@{name}"),
        Some(sender) => format!("user {}", sender.id),
        None => "anonymous".to_string(),
    }
}

#[async_trait]
impl MessageRecorder for InMemoryHistory {
    async fn record(&self, event: &Event) -> HandlerResult {
        let Some(message) = event.as_message() else {
            return Ok(());
        };
        if message.text.is_empty() || parse_command(&message.text).is_some() {
            return Ok(());
        }

        let mut chats = self.chats.write().await;
        let history = chats.entry(message.chat_id).or_default();
        history.push(StoredMessage {
            message_id: message.message_id,
            author: author(message),
            text: message.text.clone(),
        });
        if history.len() > HISTORY_PER_CHAT {
            let excess = history.len() - HISTORY_PER_CHAT;
            history.drain(..excess);
        }
        Ok(())
    }

    async fn sync_edited(&self, event: &Event) -> HandlerResult {
        let Some(message) = event.as_message() else {
            return Ok(());
        };

        let mut chats = self.chats.write().await;
        if let Some(stored) = chats
            .get_mut(&message.chat_id)
            .and_then(|h| h.iter_mut().find(|m| m.message_id == message.message_id))
        {
            stored.text.clone_from(&message.text);
        }
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Payload of the "Refresh" button.
#[derive(Debug, Serialize, Deserialize)]
struct RecapRequest {
    count: usize,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn send_recap(ctx: &Context, history: &InMemoryHistory, count: usize) -> HandlerResult {
    let chat_id = ctx.event().chat_id();
    let messages = history.recent(chat_id, count).await;

    if messages.is_empty() {
        ctx.reply("Nothing to recap yet.", &ReplyOptions::default())
            .await?;
        return Ok(());
    }

    let mut segments = vec![format!("<b>Last {} messages</b>", messages.len())];
    segments.extend(
        messages
            .iter()
            .map(|m| format!("<b>{}</b>: {}", escape_html(&m.author), escape_html(&m.text))),
    );

    let refresh = encode_callback_data("recap", &RecapRequest { count })?;
    let options = ReplyOptions::html()
        .with_keyboard(InlineKeyboard::new().row(vec![InlineButton::new("Refresh", refresh)]));

    let delivery = ctx.reply_segments(&segments, &options).await;
    if let Some((index, error)) = delivery.failed {
        warn!(
            chat_id = %chat_id,
            page = index + 1,
            total = delivery.total,
            "Recap delivery stopped"
        );
        return Err(error.into());
    }
    Ok(())
}

async fn recap_command(ctx: Arc<Context>, history: Arc<InMemoryHistory>) -> HandlerResult {
    let count = parse_command(ctx.event().text())
        .and_then(|(_, args)| args.parse::<usize>().ok())
        .unwrap_or(DEFAULT_RECAP)
        .clamp(1, MAX_RECAP);

    send_recap(&ctx, &history, count).await
}

async fn refresh_callback(ctx: Arc<Context>, history: Arc<InMemoryHistory>) -> HandlerResult {
    let request: RecapRequest = ctx.bind_callback_data()?;
    ctx.answer_callback_query(CallbackAnswer::text("Refreshing recap"))
        .await?;
    send_recap(&ctx, &history, request.count.clamp(1, MAX_RECAP)).await
}

async fn help_command(ctx: Arc<Context>) -> HandlerResult {
    ctx.reply(
        format!(
            "Send /recap [n] to see the last n messages (default {DEFAULT_RECAP}, max {MAX_RECAP})."
        ),
        &ReplyOptions::default(),
    )
    .await?;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    let config = loader.load()?;
    init_from_config(&config.logging);

    let history = Arc::new(InMemoryHistory::default());
    let dispatcher = Arc::new(Dispatcher::new());

    // Record before anything else sees the event.
    dispatcher.use_middleware(RecordMessage::new(history.clone()))?;

    dispatcher.handle(Matcher::command("start").name("start"), help_command)?;
    dispatcher.handle(Matcher::command("help").name("help"), help_command)?;
    {
        let history = history.clone();
        dispatcher.handle(Matcher::command("recap").name("recap"), move |ctx: Arc<Context>| {
            recap_command(ctx, history.clone())
        })?;
    }
    {
        let history = history.clone();
        dispatcher.handle_callback_query("recap", move |ctx: Arc<Context>| {
            refresh_callback(ctx, history.clone())
        })?;
    }

    let service = BotService::new(config, dispatcher)?;
    info!("Starting recap bot");
    service.run().await?;

    Ok(())
}
