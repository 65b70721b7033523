//! # tgdispatch core
//!
//! The dispatch engine of the tgdispatch Telegram bot framework.
//!
//! This crate has no network code. It defines the event model, the
//! middleware chain and handler registry, the per-event [`Context`], the
//! message splitter and the outbound rate limiter. Transports and the
//! service lifecycle live in `tgdispatch-transport` and `tgdispatch-runtime`.
//!
//! ## Pipeline
//!
//! ```text
//! ┌───────────┐     ┌──────────────────────────┐     ┌───────────┐
//! │ Transport │────▶│ Dispatcher               │────▶│  Handler  │
//! │ (webhook/ │     │ middleware → middleware  │     │ (first    │
//! │  polling) │     │ → first matching route   │     │  match)   │
//! └───────────┘     └──────────────────────────┘     └─────┬─────┘
//!                                                          │ Context::reply
//!                                                          ▼
//!                                                   Bot (rate-limited)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tgdispatch_core::{Context, Dispatcher, Flow, HandlerResult, Matcher, ReplyOptions};
//!
//! async fn ping(ctx: Arc<Context>) -> HandlerResult {
//!     ctx.reply("pong", &ReplyOptions::default()).await?;
//!     Ok(())
//! }
//!
//! let dispatcher = Dispatcher::new();
//! dispatcher.use_middleware(|_ctx: Arc<Context>| async { Ok(Flow::Continue) })?;
//! dispatcher.handle(Matcher::command("ping"), ping)?;
//! ```

pub mod bot;
pub mod callback;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
pub mod matcher;
pub mod middleware;
pub mod outbound;
pub mod ratelimit;
pub mod split;

pub use bot::{Bot, BoxedBot, BoxedPlatformApi, PlatformApi};
pub use callback::{
    BoxedActionStore, CALLBACK_DATA_LIMIT, CallbackAction, CallbackActionStore,
    encode_callback_data,
};
pub use context::{Context, Delivery};
pub use dispatcher::{DispatchOutcome, Dispatcher, ErrorSink, TracingErrorSink};
pub use error::{
    AcquireError, ApiError, ApiResult, BindError, BindResult, DispatchError, HandlerError,
    HandlerResult,
};
pub use event::{
    CallbackQueryEvent, ChatId, Event, EventKind, MessageEvent, Sender, UserId, unix_now,
};
pub use handler::{BoxedHandler, Handler, into_handler};
pub use matcher::{Matcher, parse_command};
pub use middleware::{BoxedMiddleware, Flow, MessageRecorder, Middleware, RecordMessage};
pub use outbound::{
    BotIdentity, CallbackAnswer, InlineButton, InlineKeyboard, MAX_MESSAGE_LENGTH,
    MessageReceipt, OutboundMessage, ParseMode, ReplyOptions, UpdateBatch,
};
pub use ratelimit::RateLimiter;
pub use split::{MessageGroup, normalize_markup, split_into_groups};
