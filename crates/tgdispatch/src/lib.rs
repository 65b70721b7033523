//! # tgdispatch
//!
//! Middleware-driven update dispatch for Telegram bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────────────────┐     ┌─────────┐
//! │  BotService  │────▶│ Dispatcher                  │────▶│ Handler │──▶ Context::reply
//! │ webhook/poll │     │ middleware → ... → matcher  │     └─────────┘        │
//! └──────────────┘     └─────────────────────────────┘                        ▼
//!                                                                Courier (rate limit + retry)
//! ```
//!
//! - **core**: events, middleware chain, handler registry, context, splitter,
//!   rate limiter
//! - **transport**: Bot API client, webhook receiver, long poller
//! - **runtime**: configuration, logging, delivery, service lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tgdispatch::prelude::*;
//!
//! async fn ping(ctx: Arc<Context>) -> HandlerResult {
//!     ctx.reply("pong", &ReplyOptions::default()).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     init_from_config(&config.logging);
//!
//!     let dispatcher = Arc::new(Dispatcher::new());
//!     dispatcher.handle(Matcher::command("ping"), ping)?;
//!
//!     BotService::new(config, dispatcher)?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `json-log`: JSON log output

pub use tgdispatch_core as core;
pub use tgdispatch_runtime as runtime;
pub use tgdispatch_transport as transport;

/// Commonly used types.
///
/// ```rust,ignore
/// use tgdispatch::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Dispatch
    pub use tgdispatch_core::{
        DispatchOutcome, Dispatcher, ErrorSink, Flow, Handler, Matcher, Middleware,
    };

    // Events and context
    pub use tgdispatch_core::{
        CallbackQueryEvent, ChatId, Context, Delivery, Event, EventKind, MessageEvent, Sender,
        UserId,
    };

    // Outbound
    pub use tgdispatch_core::{
        Bot, CallbackAnswer, InlineButton, InlineKeyboard, MessageReceipt, OutboundMessage,
        ParseMode, ReplyOptions, encode_callback_data,
    };

    // Collaborators
    pub use tgdispatch_core::{CallbackAction, CallbackActionStore, MessageRecorder, RecordMessage};

    // Errors
    pub use tgdispatch_core::{ApiError, ApiResult, BindError, HandlerError, HandlerResult};

    // Runtime
    pub use tgdispatch_runtime::{
        BotService, BotState, ConfigLoader, RuntimeError, TgDispatchConfig, init_from_config,
        load_config,
    };
}
