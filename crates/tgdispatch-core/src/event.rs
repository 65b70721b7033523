//! Inbound event model.
//!
//! An [`Event`] is one decoded occurrence from the platform. Transports turn
//! raw wire updates into events; the dispatcher never sees wire types.
//!
//! ```text
//! Event
//! ├── Message(MessageEvent)
//! ├── EditedMessage(MessageEvent)
//! └── CallbackQuery(CallbackQueryEvent)
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identifier of a chat (private chat, group, supergroup or channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sender of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// User ID.
    pub id: UserId,
    /// Username without the leading `@`, if the user has one.
    #[serde(default)]
    pub username: Option<String>,
    /// Whether the sender is a bot.
    #[serde(default)]
    pub is_bot: bool,
}

/// A plain or edited text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Update sequence number assigned by the platform.
    pub update_id: i64,
    /// Message ID within the chat.
    pub message_id: i64,
    /// Origin chat.
    pub chat_id: ChatId,
    /// Sender, absent for anonymous channel posts.
    pub sender: Option<Sender>,
    /// Text or caption; empty for non-text messages.
    pub text: String,
    /// Unix timestamp (seconds) of the message, or of the edit for edited messages.
    pub date: i64,
    /// The message this one replies to, if any.
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
}

/// An interaction with an inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQueryEvent {
    /// Update sequence number assigned by the platform.
    pub update_id: i64,
    /// Callback query ID, needed to answer the query.
    pub id: String,
    /// Chat of the message carrying the button.
    pub chat_id: ChatId,
    /// Message carrying the button, if still accessible.
    #[serde(default)]
    pub message_id: Option<i64>,
    /// User who pressed the button.
    pub sender: Sender,
    /// Raw `callback_data` attached to the button.
    #[serde(default)]
    pub data: Option<String>,
    /// Unix timestamp (seconds) at which the event was received.
    pub date: i64,
}

/// Discriminant of an [`Event`], used by matchers and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new message.
    Message,
    /// An edited message.
    EditedMessage,
    /// A callback query.
    CallbackQuery,
}

impl EventKind {
    /// Returns a stable name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::EditedMessage => "edited_message",
            Self::CallbackQuery => "callback_query",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound occurrence from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A new message.
    Message(MessageEvent),
    /// An edited message.
    EditedMessage(MessageEvent),
    /// A callback query from an inline keyboard.
    CallbackQuery(CallbackQueryEvent),
}

impl Event {
    /// Returns the event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::EditedMessage(_) => EventKind::EditedMessage,
            Self::CallbackQuery(_) => EventKind::CallbackQuery,
        }
    }

    /// Returns the platform update ID.
    pub fn update_id(&self) -> i64 {
        match self {
            Self::Message(m) | Self::EditedMessage(m) => m.update_id,
            Self::CallbackQuery(q) => q.update_id,
        }
    }

    /// Returns the origin chat.
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Message(m) | Self::EditedMessage(m) => m.chat_id,
            Self::CallbackQuery(q) => q.chat_id,
        }
    }

    /// Returns the sender, if known.
    pub fn sender(&self) -> Option<&Sender> {
        match self {
            Self::Message(m) | Self::EditedMessage(m) => m.sender.as_ref(),
            Self::CallbackQuery(q) => Some(&q.sender),
        }
    }

    /// Returns the message text, or the raw callback data for callback queries.
    pub fn text(&self) -> &str {
        match self {
            Self::Message(m) | Self::EditedMessage(m) => &m.text,
            Self::CallbackQuery(q) => q.data.as_deref().unwrap_or(""),
        }
    }

    /// Returns the message payload for message-like events.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(m) | Self::EditedMessage(m) => Some(m),
            Self::CallbackQuery(_) => None,
        }
    }

    /// Returns the callback payload for callback queries.
    pub fn as_callback_query(&self) -> Option<&CallbackQueryEvent> {
        match self {
            Self::CallbackQuery(q) => Some(q),
            _ => None,
        }
    }

    /// Returns `true` for callback queries.
    pub fn is_callback_query(&self) -> bool {
        matches!(self, Self::CallbackQuery(_))
    }

    /// Returns the event timestamp.
    pub fn timestamp(&self) -> SystemTime {
        let secs = match self {
            Self::Message(m) | Self::EditedMessage(m) => m.date,
            Self::CallbackQuery(q) => q.date,
        };
        UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
    }
}

/// Returns the current unix time in seconds.
///
/// Callback queries carry no timestamp on the wire, so transports stamp them
/// with the receive time.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
