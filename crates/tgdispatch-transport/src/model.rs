//! Telegram Bot API wire types.
//!
//! Only the fields the framework reads are modelled; unknown fields are
//! ignored by serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tgdispatch_core::{
    ApiError, ApiResult, CallbackQueryEvent, ChatId, Event, InlineKeyboard, MessageEvent,
    MessageReceipt, OutboundMessage, ParseMode, Sender, UserId, unix_now,
};

/// One entry of `getUpdates`, or one webhook request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<MessageRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub chat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl From<User> for Sender {
    fn from(user: User) -> Self {
        Sender {
            id: UserId(user.id),
            username: user.username,
            is_bot: user.is_bot,
        }
    }
}

impl Message {
    fn into_event(self, update_id: i64) -> MessageEvent {
        MessageEvent {
            update_id,
            message_id: self.message_id,
            chat_id: ChatId(self.chat.id),
            sender: self.from.map(Sender::from),
            text: self.text.or(self.caption).unwrap_or_default(),
            date: self.date,
            reply_to_message_id: self.reply_to_message.map(|r| r.message_id),
        }
    }
}

impl Update {
    /// Converts the update into a framework event.
    ///
    /// Update types the framework does not handle yield `None`.
    pub fn into_event(self) -> Option<Event> {
        let update_id = self.update_id;
        if let Some(message) = self.message {
            return Some(Event::Message(message.into_event(update_id)));
        }
        if let Some(message) = self.edited_message {
            return Some(Event::EditedMessage(message.into_event(update_id)));
        }
        let query = self.callback_query?;

        // Inline-mode queries carry no message; answer in the user's private chat.
        let (chat_id, message_id) = match &query.message {
            Some(m) => (m.chat.id, Some(m.message_id)),
            None => (query.from.id, None),
        };
        Some(Event::CallbackQuery(CallbackQueryEvent {
            update_id,
            id: query.id,
            chat_id: ChatId(chat_id),
            message_id,
            sender: query.from.into(),
            data: query.data,
            date: unix_now(),
        }))
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    /// Maps the envelope onto the framework's error classes.
    ///
    /// - `429` becomes [`ApiError::TooManyRequests`] (default delay 1s when
    ///   the platform omits `retry_after`)
    /// - `5xx` becomes [`ApiError::Transport`] so it is retried
    /// - any other failure becomes [`ApiError::Rejected`]
    pub fn into_result(self) -> ApiResult<T> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| ApiError::Decode("response is missing `result`".into()));
        }

        let code = self.error_code.unwrap_or_default();
        let description = self.description.unwrap_or_else(|| "unknown error".into());
        let retry_after = self.parameters.and_then(|p| p.retry_after);

        match code {
            429 => Err(ApiError::TooManyRequests {
                retry_after: Duration::from_secs(retry_after.unwrap_or(1)),
            }),
            500..=599 => Err(ApiError::Transport(format!("{code}: {description}"))),
            _ => Err(ApiError::Rejected { code, description }),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
pub struct LinkPreviewOptions {
    pub is_disabled: bool,
}

/// Body of `sendMessage`.
#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<&'a InlineKeyboard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_preview_options: Option<LinkPreviewOptions>,
}

impl<'a> From<&'a OutboundMessage> for SendMessageRequest<'a> {
    fn from(message: &'a OutboundMessage) -> Self {
        Self {
            chat_id: message.chat_id.0,
            text: &message.text,
            parse_mode: message.parse_mode,
            reply_to_message_id: message.reply_to_message_id,
            reply_markup: message.reply_markup.as_ref(),
            link_preview_options: message
                .disable_link_preview
                .then_some(LinkPreviewOptions { is_disabled: true }),
        }
    }
}

/// Body of `answerCallbackQuery`.
#[derive(Debug, Serialize)]
pub struct AnswerCallbackQueryRequest<'a> {
    pub callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    pub show_alert: bool,
}

/// Body of `getUpdates`.
#[derive(Debug, Serialize)]
pub struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    pub timeout: u64,
    pub allowed_updates: &'static [&'static str],
}

/// Body of `setWebhook`.
#[derive(Debug, Serialize)]
pub struct SetWebhookRequest<'a> {
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<&'a str>,
    pub allowed_updates: &'static [&'static str],
}

/// Update types requested from the platform.
pub const ALLOWED_UPDATES: &[&str] = &["message", "edited_message", "callback_query"];

impl From<Message> for MessageReceipt {
    fn from(message: Message) -> Self {
        MessageReceipt {
            chat_id: ChatId(message.chat.id),
            message_id: message.message_id,
        }
    }
}
