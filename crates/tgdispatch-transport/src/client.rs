//! reqwest-based Bot API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use tgdispatch_core::{
    ApiError, ApiResult, BotIdentity, CallbackAnswer, MessageReceipt, OutboundMessage, PlatformApi,
    UpdateBatch, UserId,
};

use crate::error::{TransportError, TransportResult};
use crate::model::{
    ALLOWED_UPDATES, AnswerCallbackQueryRequest, ApiResponse, GetUpdatesRequest, Message,
    SendMessageRequest, SetWebhookRequest, Update, User,
};

/// Default Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Options for [`TelegramClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API base URL, without the `/bot<token>` suffix.
    pub api_base: String,
    /// Timeout for ordinary requests. Long-poll requests add the poll timeout.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Bot API client. One request per call; no retries, no throttling.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
}

impl TelegramClient {
    /// Creates a client for the bot identified by `token`.
    pub fn new(token: &str, options: ClientOptions) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", options.api_base.trim_end_matches('/'), token),
            request_timeout: options.request_timeout,
        })
    }

    async fn call<P, R>(&self, method: &str, params: &P, timeout: Option<Duration>) -> ApiResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        trace!(method, "Calling Bot API");
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("{method}: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(format!("{method}: {}", e.without_url())))?;

        decode_response(method, status.as_u16(), &body)
    }
}

/// Decodes a response body. Telegram answers errors with a JSON envelope, so
/// the envelope is preferred over the HTTP status when it parses.
fn decode_response<R: DeserializeOwned>(method: &str, status: u16, body: &[u8]) -> ApiResult<R> {
    match serde_json::from_slice::<ApiResponse<R>>(body) {
        Ok(envelope) => envelope.into_result().inspect_err(|e| {
            debug!(method, status, error = %e, "Bot API call failed");
        }),
        Err(_) if status >= 500 => Err(ApiError::transport(format!("{method}: HTTP {status}"))),
        Err(e) => Err(ApiError::Decode(format!("{method}: {e}"))),
    }
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The endpoint embeds the bot token.
        f.debug_struct("TelegramClient")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PlatformApi for TelegramClient {
    async fn get_me(&self) -> ApiResult<BotIdentity> {
        let user: User = self.call("getMe", &serde_json::json!({}), None).await?;
        Ok(BotIdentity {
            id: UserId(user.id),
            username: user.username.unwrap_or_default(),
        })
    }

    async fn send_message(&self, message: &OutboundMessage) -> ApiResult<MessageReceipt> {
        let sent: Message = self
            .call("sendMessage", &SendMessageRequest::from(message), None)
            .await?;
        Ok(sent.into())
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        answer: &CallbackAnswer,
    ) -> ApiResult<()> {
        let request = AnswerCallbackQueryRequest {
            callback_query_id: callback_id,
            text: answer.text.as_deref(),
            show_alert: answer.show_alert,
        };
        let _: bool = self.call("answerCallbackQuery", &request, None).await?;
        Ok(())
    }

    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> ApiResult<UpdateBatch> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ALLOWED_UPDATES,
        };
        let updates: Vec<Update> = self
            .call("getUpdates", &request, Some(self.request_timeout + timeout))
            .await?;
        Ok(into_batch(updates))
    }

    async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> ApiResult<()> {
        let request = SetWebhookRequest {
            url,
            secret_token,
            allowed_updates: ALLOWED_UPDATES,
        };
        let _: bool = self.call("setWebhook", &request, None).await?;
        Ok(())
    }

    async fn delete_webhook(&self) -> ApiResult<()> {
        let _: bool = self
            .call("deleteWebhook", &serde_json::json!({}), None)
            .await?;
        Ok(())
    }
}

/// Converts raw updates into events and computes the next offset.
///
/// The offset advances past every update, including those that produce no
/// event, so unsupported updates are confirmed rather than redelivered.
pub fn into_batch(updates: Vec<Update>) -> UpdateBatch {
    let next_offset = updates.iter().map(|u| u.update_id + 1).max();
    let events = updates.into_iter().filter_map(Update::into_event).collect();
    UpdateBatch {
        events,
        next_offset,
    }
}
