//! Capability traits for talking to the platform.
//!
//! Two layers exist on purpose:
//!
//! - [`PlatformApi`] is the raw method surface of the Bot API. One call, one
//!   HTTP request, no throttling. Implemented by the transport crate.
//! - [`Bot`] is what handlers see through the [`Context`](crate::Context).
//!   The runtime implements it on top of `PlatformApi` with rate limiting and
//!   retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::outbound::{BotIdentity, CallbackAnswer, MessageReceipt, OutboundMessage, UpdateBatch};

/// Outbound delivery capability handed to handlers.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Delivers a message.
    async fn send(&self, message: OutboundMessage) -> ApiResult<MessageReceipt>;

    /// Answers a callback query.
    async fn answer_callback(&self, callback_id: &str, answer: CallbackAnswer) -> ApiResult<()>;

    /// Maximum message length the bot is configured for.
    fn max_message_length(&self) -> usize {
        crate::outbound::MAX_MESSAGE_LENGTH
    }
}

/// Type alias for a shared bot handle.
pub type BoxedBot = Arc<dyn Bot>;

/// Raw Bot API surface.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Returns the bot identity; used to verify credentials.
    async fn get_me(&self) -> ApiResult<BotIdentity>;

    /// Calls `sendMessage`.
    async fn send_message(&self, message: &OutboundMessage) -> ApiResult<MessageReceipt>;

    /// Calls `answerCallbackQuery`.
    async fn answer_callback_query(
        &self,
        callback_id: &str,
        answer: &CallbackAnswer,
    ) -> ApiResult<()>;

    /// Calls `getUpdates`, waiting up to `timeout` on the server side.
    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> ApiResult<UpdateBatch>;

    /// Calls `setWebhook`.
    async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> ApiResult<()>;

    /// Calls `deleteWebhook`.
    async fn delete_webhook(&self) -> ApiResult<()>;
}

/// Type alias for a shared platform API.
pub type BoxedPlatformApi = Arc<dyn PlatformApi>;
