//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BotConfig, DispatchConfig, LogFormat, LogOutput, LoggingConfig, PollingConfig,
    RateLimitConfig, RetryConfig, TgDispatchConfig, TransportConfig, TransportMode, WebhookConfig,
};

use tgdispatch_core::MAX_MESSAGE_LENGTH;

/// Validates the entire configuration.
///
/// Log levels are checked when the configuration is extracted; an unknown
/// level never reaches this function.
pub fn validate_config(config: &TgDispatchConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_transport_config(&config.transport)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    validate_token(&bot.token)?;
    validate_url(&bot.api_base, &["http://", "https://"])?;

    if bot.request_timeout_ms == 0 {
        return Err(ConfigError::validation("Request timeout must be greater than 0"));
    }

    if bot.max_message_length == 0 || bot.max_message_length > MAX_MESSAGE_LENGTH {
        return Err(ConfigError::validation(format!(
            "Max message length must be between 1 and {MAX_MESSAGE_LENGTH}"
        )));
    }

    Ok(())
}

/// Checks the `<numeric id>:<secret>` shape. The secret is never echoed.
fn validate_token(token: &str) -> ConfigResult<()> {
    if token.is_empty() {
        return Err(ConfigError::missing_field("bot.token"));
    }

    let Some((id, secret)) = token.split_once(':') else {
        return Err(ConfigError::InvalidToken("missing ':' separator".into()));
    };
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::InvalidToken("bot id must be numeric".into()));
    }
    if secret.is_empty() || secret.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidToken(
            "secret must be non-empty without whitespace".into(),
        ));
    }

    Ok(())
}

fn validate_transport_config(transport: &TransportConfig) -> ConfigResult<()> {
    match transport.mode {
        TransportMode::Webhook => validate_webhook_config(&transport.webhook),
        TransportMode::Polling => validate_polling_config(&transport.polling),
    }
}

fn validate_webhook_config(webhook: &WebhookConfig) -> ConfigResult<()> {
    if webhook.url.is_empty() {
        return Err(ConfigError::missing_field("transport.webhook.url"));
    }
    validate_url(&webhook.url, &["https://"])?;
    validate_port(webhook.port)?;
    validate_path(&webhook.path)?;

    if let Some(secret) = &webhook.secret {
        // Platform rule: 1-256 characters of A-Z, a-z, 0-9, `_` and `-`.
        let valid = !secret.is_empty()
            && secret.len() <= 256
            && secret
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(ConfigError::validation(
                "Webhook secret must be 1-256 characters of [A-Za-z0-9_-]",
            ));
        }
    }

    Ok(())
}

fn validate_polling_config(polling: &PollingConfig) -> ConfigResult<()> {
    validate_backoff(
        polling.initial_delay_ms,
        polling.max_delay_ms,
        polling.backoff_multiplier,
    )
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.max_in_flight == 0 {
        return Err(ConfigError::validation("max_in_flight must be greater than 0"));
    }
    if dispatch.queue_capacity == 0 {
        return Err(ConfigError::validation("queue_capacity must be greater than 0"));
    }
    Ok(())
}

fn validate_rate_limit_config(rate_limit: &RateLimitConfig) -> ConfigResult<()> {
    if rate_limit.capacity == 0 {
        return Err(ConfigError::validation(
            "Rate limit capacity must be greater than 0",
        ));
    }
    if !rate_limit.refill_per_sec.is_finite() || rate_limit.refill_per_sec <= 0.0 {
        return Err(ConfigError::validation(
            "Rate limit refill rate must be a positive number",
        ));
    }
    Ok(())
}

fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::validation("Retry attempts must be at least 1"));
    }
    validate_backoff(
        retry.initial_delay_ms,
        retry.max_delay_ms,
        retry.backoff_multiplier,
    )
}

fn validate_backoff(initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> ConfigResult<()> {
    if initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if max_delay_ms < initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "JSON log format requires the `json-log` feature",
        ));
    }

    for module in logging.filters.keys() {
        if module.is_empty() || module.contains(|c: char| c.is_whitespace() || c == '=') {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {module:?}"
            )));
        }
    }

    Ok(())
}

fn validate_url(url: &str, schemes: &[&str]) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }

    if !schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {schemes:?}"),
        ));
    }

    Ok(())
}

fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

fn validate_path(path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TgDispatchConfig {
        let mut config = TgDispatchConfig::default();
        config.bot.token = "123456:ABC-def_ghi".to_string();
        config
    }

    #[test]
    fn test_validate_default_with_token() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_validate_token_shape() {
        let mut config = TgDispatchConfig::default();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        for token in ["abc:def", "123", "123:", ":secret", "12 3:x", "123:a b"] {
            config.bot.token = token.to_string();
            assert!(
                matches!(validate_config(&config), Err(ConfigError::InvalidToken(_))),
                "{token} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_token_error_does_not_leak_secret() {
        let mut config = TgDispatchConfig::default();
        config.bot.token = "123:supersecret value".to_string();
        let message = validate_config(&config).unwrap_err().to_string();
        assert!(!message.contains("supersecret"));
    }

    #[test]
    fn test_validate_webhook() {
        let mut config = valid();
        config.transport.mode = TransportMode::Webhook;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.transport.webhook.url = "http://bot.example.com/hook".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));

        config.transport.webhook.url = "https://bot.example.com/hook".into();
        assert!(validate_config(&config).is_ok());

        config.transport.webhook.port = 0;
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidPort(0))));
        config.transport.webhook.port = 8443;

        config.transport.webhook.path = "hook".into();
        assert!(validate_config(&config).is_err());
        config.transport.webhook.path = "/hook".into();

        config.transport.webhook.secret = Some("not allowed!".into());
        assert!(validate_config(&config).is_err());
        config.transport.webhook.secret = Some("Ok_secret-1".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_webhook_section_ignored_in_polling_mode() {
        let mut config = valid();
        config.transport.webhook.port = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_limits() {
        let mut config = valid();
        config.dispatch.max_in_flight = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.dispatch.queue_capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.rate_limit.capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.rate_limit.refill_per_sec = 0.0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.bot.max_message_length = 5000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_retry() {
        let mut config = valid();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.retry.backoff_multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.retry.max_delay_ms = config.retry.initial_delay_ms - 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_logging() {
        let mut config = valid();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some("bot.log".into());
        assert!(validate_config(&config).is_ok());

        config
            .logging
            .filters
            .insert("bad target".into(), crate::config::LogLevel::Debug);
        assert!(validate_config(&config).is_err());
    }
}
