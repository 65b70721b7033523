//! Configuration for the tgdispatch runtime.
//!
//! Settings are layered with figment: built-in defaults, then TOML files,
//! then `TGDISPATCH_*` environment variables. [`validate_config`] runs before
//! a [`BotService`](crate::BotService) is constructed.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    PollingConfig, RateLimitConfig, RetryConfig, SpanEventConfig, TgDispatchConfig,
    TransportConfig, TransportMode, WebhookConfig,
};
pub use validation::validate_config;
