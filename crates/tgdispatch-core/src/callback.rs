//! Callback data encoding and action resolution.
//!
//! Button data travels inline as `<action>` or `<action>|<json payload>`.
//! The platform caps it at [`CALLBACK_DATA_LIMIT`] bytes, so larger payloads
//! are kept by a [`CallbackActionStore`] and the button only carries a token.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{BindError, BindResult, HandlerResult};

/// Maximum size of `callback_data` in bytes.
pub const CALLBACK_DATA_LIMIT: usize = 64;

/// Separator between the action token and the inline payload.
pub const PAYLOAD_SEPARATOR: char = '|';

/// A resolved callback action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAction {
    /// Action token matched against `handle_callback_query` registrations.
    pub action: String,
    /// Raw payload, decoded on demand by `Context::bind_callback_data`.
    pub payload: Option<String>,
}

impl CallbackAction {
    /// Parses inline callback data.
    pub fn parse_inline(data: &str) -> Self {
        match data.split_once(PAYLOAD_SEPARATOR) {
            Some((action, payload)) => Self {
                action: action.to_string(),
                payload: Some(payload.to_string()),
            },
            None => Self {
                action: data.to_string(),
                payload: None,
            },
        }
    }
}

/// Resolves opaque callback tokens into actions.
///
/// Implemented by the storage layer. Returning `Ok(None)` falls back to
/// inline parsing of the raw data.
#[async_trait]
pub trait CallbackActionStore: Send + Sync {
    /// Looks up the action stored under `token`.
    async fn lookup(&self, token: &str) -> HandlerResult<Option<CallbackAction>>;
}

/// Type alias for a shared action store.
pub type BoxedActionStore = Arc<dyn CallbackActionStore>;

/// Encodes an action and payload into inline callback data.
///
/// Fails with [`BindError::TooLong`] when the result would not fit in a
/// button.
pub fn encode_callback_data<T: Serialize>(action: &str, payload: &T) -> BindResult<String> {
    let json = serde_json::to_string(payload).map_err(|e| BindError::Invalid(e.to_string()))?;
    let data = format!("{action}{PAYLOAD_SEPARATOR}{json}");
    if data.len() > CALLBACK_DATA_LIMIT {
        return Err(BindError::TooLong {
            len: data.len(),
            limit: CALLBACK_DATA_LIMIT,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Page {
        page: u32,
    }

    #[test]
    fn test_parse_inline_without_payload() {
        let action = CallbackAction::parse_inline("recap:chat123");
        assert_eq!(action.action, "recap:chat123");
        assert!(action.payload.is_none());
    }

    #[test]
    fn test_parse_inline_with_payload() {
        let action = CallbackAction::parse_inline(r#"page|{"page":2}"#);
        assert_eq!(action.action, "page");
        assert_eq!(action.payload.as_deref(), Some(r#"{"page":2}"#));
    }

    #[test]
    fn test_encode_then_parse() {
        let data = encode_callback_data("page", &Page { page: 3 }).unwrap();
        assert_eq!(data, r#"page|{"page":3}"#);
        let action = CallbackAction::parse_inline(&data);
        assert_eq!(action.action, "page");
    }

    #[test]
    fn test_encode_rejects_oversized_data() {
        let long = "x".repeat(80);
        let err = encode_callback_data("act", &long).unwrap_err();
        assert!(matches!(err, BindError::TooLong { limit: 64, .. }));
    }
}
