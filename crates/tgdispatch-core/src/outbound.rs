//! Outbound message types.

use serde::{Deserialize, Serialize};

use crate::event::{ChatId, Event, UserId};

/// Default maximum message length accepted by the platform, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Text markup mode for outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    /// `HTML` parse mode.
    #[serde(rename = "HTML")]
    Html,
    /// `MarkdownV2` parse mode.
    #[serde(rename = "MarkdownV2")]
    MarkdownV2,
}

/// A single inline keyboard button carrying callback data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    /// Button label.
    pub text: String,
    /// Opaque data sent back in the callback query.
    pub callback_data: String,
}

impl InlineButton {
    /// Creates a new button.
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard attached to a message, as rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    /// Rows of buttons.
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// Creates an empty keyboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row of buttons (builder pattern).
    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        self.inline_keyboard.push(buttons);
        self
    }
}

/// A message to be delivered by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target chat.
    pub chat_id: ChatId,
    /// Body text.
    pub text: String,
    /// Optional markup mode.
    pub parse_mode: Option<ParseMode>,
    /// Optional message to reply to.
    pub reply_to_message_id: Option<i64>,
    /// Optional inline keyboard.
    pub reply_markup: Option<InlineKeyboard>,
    /// Whether link previews should be disabled.
    pub disable_link_preview: bool,
}

impl OutboundMessage {
    /// Creates a plain text message.
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            reply_to_message_id: None,
            reply_markup: None,
            disable_link_preview: false,
        }
    }

    /// Sets the parse mode.
    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    /// Sets the message this one replies to.
    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }

    /// Attaches an inline keyboard.
    pub fn keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.reply_markup = Some(keyboard);
        self
    }

    /// Disables link previews.
    pub fn without_link_preview(mut self) -> Self {
        self.disable_link_preview = true;
        self
    }
}

/// Options for [`Context::reply`](crate::Context::reply).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    /// Optional markup mode.
    pub parse_mode: Option<ParseMode>,
    /// Quote the originating message.
    pub quote: bool,
    /// Optional inline keyboard (attached to the last chunk for paginated replies).
    pub keyboard: Option<InlineKeyboard>,
    /// Whether link previews should be disabled.
    pub disable_link_preview: bool,
}

impl ReplyOptions {
    /// Options for an HTML reply.
    pub fn html() -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            ..Default::default()
        }
    }

    /// Quote the originating message (builder pattern).
    pub fn quoted(mut self) -> Self {
        self.quote = true;
        self
    }

    /// Attaches an inline keyboard (builder pattern).
    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Builds an outbound message answering `event`.
    pub(crate) fn to_message(&self, event: &Event, text: String) -> OutboundMessage {
        let mut msg = OutboundMessage::new(event.chat_id(), text);
        msg.parse_mode = self.parse_mode;
        msg.disable_link_preview = self.disable_link_preview;
        msg.reply_markup = self.keyboard.clone();
        if self.quote {
            msg.reply_to_message_id = match event {
                Event::Message(m) | Event::EditedMessage(m) => Some(m.message_id),
                Event::CallbackQuery(q) => q.message_id,
            };
        }
        msg
    }
}

/// Receipt for a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    /// Chat the message was delivered to.
    pub chat_id: ChatId,
    /// ID assigned by the platform.
    pub message_id: i64,
}

/// Answer to a callback query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAnswer {
    /// Notification text shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Show an alert instead of a toast.
    #[serde(default)]
    pub show_alert: bool,
}

impl CallbackAnswer {
    /// An answer with a toast text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            show_alert: false,
        }
    }

    /// An answer shown as an alert.
    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            show_alert: true,
        }
    }
}

/// Identity of the bot account, as returned by `getMe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    /// Bot user ID.
    pub id: UserId,
    /// Bot username.
    pub username: String,
}

/// A batch of events fetched by long polling.
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    /// Decoded events, in update order.
    pub events: Vec<Event>,
    /// Offset to request next (highest update ID seen plus one).
    pub next_offset: Option<i64>,
}
