//! # tgdispatch runtime
//!
//! Runs a [`Dispatcher`](tgdispatch_core::Dispatcher) against Telegram.
//!
//! - [`config`]: layered configuration (defaults, TOML files, `TGDISPATCH_*`
//!   environment variables) and validation
//! - [`logging`]: tracing subscriber setup from [`LoggingConfig`](config::LoggingConfig)
//! - [`delivery`]: [`Courier`], the rate-limited and retrying bot handle
//! - [`service`]: [`BotService`], the lifecycle owner
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tgdispatch_core::Dispatcher;
//! use tgdispatch_runtime::{BotService, config::load_config, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let dispatcher = Arc::new(Dispatcher::new());
//!     // register middleware and handlers here
//!
//!     BotService::new(config, dispatcher)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod service;

pub use config::{ConfigError, ConfigLoader, ConfigResult, TgDispatchConfig, load_config};
pub use delivery::{Courier, RetryPolicy};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use service::{BotService, BotState, wait_for_shutdown};
