//! # tgdispatch transport
//!
//! Network plumbing between the Telegram Bot API and the dispatcher.
//!
//! ## Features
//!
//! - `http-client` (default): [`TelegramClient`], a reqwest implementation of
//!   [`PlatformApi`](tgdispatch_core::PlatformApi)
//! - `webhook-server` (default): an axum receiver for webhook updates
//!
//! The long-poll loop and the wire model are always available.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  tgdispatch-runtime  │  (lifecycle, delivery discipline)
//! ├──────────────────────┤
//! │  tgdispatch-transport│  <- This crate (wire model, client, inbound)
//! ├──────────────────────┤
//! │  Bot API (HTTPS)     │
//! └──────────────────────┘
//! ```

pub mod error;
pub mod model;
pub mod polling;

#[cfg(feature = "http-client")]
pub mod client;

#[cfg(feature = "webhook-server")]
pub mod webhook;

pub use error::{TransportError, TransportResult};
pub use model::Update;
pub use polling::{LongPoller, PollOptions};

#[cfg(feature = "http-client")]
pub use client::{ClientOptions, DEFAULT_API_BASE, TelegramClient};

#[cfg(feature = "webhook-server")]
pub use webhook::{ListenerHandle, SECRET_HEADER};
