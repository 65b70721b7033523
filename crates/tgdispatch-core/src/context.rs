//! Per-event context.
//!
//! A [`Context`] is created by the dispatcher for exactly one event and lives
//! until the middleware chain and the matched handler have returned. It is
//! handed around as `Arc<Context>` so async handlers can hold it across await
//! points, but it never leaves the task that dispatches its event.
//!
//! The scratch map is keyed by type. Declare a newtype per key:
//!
//! ```rust,ignore
//! #[derive(Clone)]
//! struct HistoryId(i64);
//!
//! ctx.set_state(HistoryId(42));            // in a middleware
//! let id = ctx.get_state::<HistoryId>();   // in a handler
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bot::BoxedBot;
use crate::callback::CallbackAction;
use crate::error::{ApiError, ApiResult, BindError, BindResult};
use crate::event::Event;
use crate::outbound::{CallbackAnswer, MessageReceipt, ReplyOptions};
use crate::split::{self, MessageGroup};

/// Room kept free in every chunk for the `(i/n)` page indicator.
const PAGE_INDICATOR_RESERVE: usize = 16;

/// The context handed to middleware and handlers.
pub struct Context {
    event: Event,
    bot: BoxedBot,
    callback: Option<CallbackAction>,
    cancel: CancellationToken,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Context {
    /// Creates a context for `event`.
    ///
    /// For callback queries the raw data is parsed inline; the dispatcher
    /// overrides it with [`with_callback_action`](Self::with_callback_action)
    /// when an action store resolved the token.
    pub fn new(event: Event, bot: BoxedBot) -> Self {
        let callback = event
            .as_callback_query()
            .and_then(|q| q.data.as_deref())
            .map(CallbackAction::parse_inline);

        Self {
            event,
            bot,
            callback,
            cancel: CancellationToken::new(),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the resolved callback action (builder pattern).
    pub fn with_callback_action(mut self, action: CallbackAction) -> Self {
        self.callback = Some(action);
        self
    }

    /// Attaches a cancellation token (builder pattern).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Returns the wrapped event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Returns the outbound bot handle.
    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    /// Returns the cancellation token for this dispatch.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the resolved callback action, if this is a callback query.
    pub fn callback_action(&self) -> Option<&CallbackAction> {
        self.callback.as_ref()
    }

    // ─── Scratch state ────────────────────────────────────────────────────────

    /// Stores a value in the scratch map. One value per type; later calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a cloned value from the scratch map.
    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Returns `true` if a value of type `T` is present.
    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.lock().contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a value from the scratch map.
    pub fn take_state<T: 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    // ─── Callback binding ─────────────────────────────────────────────────────

    /// Deserializes the callback payload into `T`.
    ///
    /// The payload is kept as a string and decoded on every call, so repeated
    /// calls yield the same result.
    pub fn bind_callback_data<T: DeserializeOwned>(&self) -> BindResult<T> {
        if !self.event.is_callback_query() {
            return Err(BindError::NotCallbackQuery);
        }

        let payload = self
            .callback
            .as_ref()
            .and_then(|a| a.payload.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(BindError::EmptyPayload)?;

        serde_json::from_str(payload).map_err(|e| BindError::Invalid(e.to_string()))
    }

    // ─── Outbound ─────────────────────────────────────────────────────────────

    /// Sends `text` to the originating chat.
    pub async fn reply(
        &self,
        text: impl Into<String>,
        options: &ReplyOptions,
    ) -> ApiResult<MessageReceipt> {
        let message = options.to_message(&self.event, text.into());
        self.guarded(self.bot.send(message)).await
    }

    /// Answers the originating callback query.
    pub async fn answer_callback_query(&self, answer: CallbackAnswer) -> ApiResult<()> {
        let Some(query) = self.event.as_callback_query() else {
            return Err(ApiError::Rejected {
                code: 400,
                description: "event is not a callback query".to_string(),
            });
        };
        self.guarded(self.bot.answer_callback(&query.id, answer))
            .await
    }

    /// Splits `segments` into platform-sized chunks and sends them in order.
    ///
    /// When more than one chunk results, each gets a `(i/n)` page indicator.
    /// Delivery stops at the first failure; the returned [`Delivery`] records
    /// which chunks made it.
    pub async fn reply_segments<S: AsRef<str>>(
        &self,
        segments: &[S],
        options: &ReplyOptions,
    ) -> Delivery {
        let limit = self.bot.max_message_length();
        let mut groups = split::split_into_groups(segments, limit);
        if groups.len() > 1 {
            let reserved = limit.saturating_sub(PAGE_INDICATOR_RESERVE);
            groups = split::split_into_groups(segments, reserved);
        }

        let total = groups.len();
        let mut delivery = Delivery {
            sent: Vec::with_capacity(total),
            failed: None,
            total,
        };

        for (i, group) in groups.iter().enumerate() {
            let text = render_page(group, i, total);
            let mut chunk_options = options.clone();
            if i + 1 < total {
                chunk_options.keyboard = None;
            }

            match self.reply(text, &chunk_options).await {
                Ok(receipt) => delivery.sent.push(receipt),
                Err(e) => {
                    debug!(
                        chat_id = %self.event.chat_id(),
                        chunk = i + 1,
                        total,
                        error = %e,
                        "Chunked reply interrupted"
                    );
                    delivery.failed = Some((i, e));
                    break;
                }
            }
        }

        delivery
    }

    async fn guarded<T>(&self, fut: impl Future<Output = ApiResult<T>>) -> ApiResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
            result = fut => result,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("event", &self.event)
            .field("callback", &self.callback)
            .finish_non_exhaustive()
    }
}

fn render_page(group: &MessageGroup, index: usize, total: usize) -> String {
    let body = group.render();
    if total > 1 {
        format!("{body}\n\n({}/{total})", index + 1)
    } else {
        body
    }
}

/// Outcome of a multi-chunk reply.
///
/// Partial delivery is a normal outcome: earlier chunks stay delivered when a
/// later one fails.
#[derive(Debug)]
pub struct Delivery {
    /// Receipts of delivered chunks, in order.
    pub sent: Vec<MessageReceipt>,
    /// Index and error of the chunk that failed, if any.
    pub failed: Option<(usize, ApiError)>,
    /// Number of chunks the reply was split into.
    pub total: usize,
}

impl Delivery {
    /// Returns `true` if every chunk was delivered.
    pub fn is_complete(&self) -> bool {
        self.failed.is_none() && self.sent.len() == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use crate::event::{CallbackQueryEvent, ChatId, MessageEvent, Sender, UserId};
    use crate::outbound::OutboundMessage;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingBot {
        sent: Mutex<Vec<OutboundMessage>>,
        answered: Mutex<Vec<(String, CallbackAnswer)>>,
        fail_from: Option<usize>,
        limit: Option<usize>,
    }

    #[async_trait]
    impl Bot for RecordingBot {
        async fn send(&self, message: OutboundMessage) -> ApiResult<MessageReceipt> {
            let mut sent = self.sent.lock();
            if self.fail_from.is_some_and(|n| sent.len() >= n) {
                return Err(ApiError::transport("connection reset"));
            }
            sent.push(message.clone());
            Ok(MessageReceipt {
                chat_id: message.chat_id,
                message_id: sent.len() as i64,
            })
        }

        async fn answer_callback(&self, id: &str, answer: CallbackAnswer) -> ApiResult<()> {
            self.answered.lock().push((id.to_string(), answer));
            Ok(())
        }

        fn max_message_length(&self) -> usize {
            self.limit.unwrap_or(crate::outbound::MAX_MESSAGE_LENGTH)
        }
    }

    fn sender() -> Sender {
        Sender {
            id: UserId(7),
            username: Some("alice".into()),
            is_bot: false,
        }
    }

    fn message(text: &str) -> Event {
        Event::Message(MessageEvent {
            update_id: 1,
            message_id: 10,
            chat_id: ChatId(-100),
            sender: Some(sender()),
            text: text.into(),
            date: 1_700_000_000,
            reply_to_message_id: None,
        })
    }

    fn callback(data: Option<&str>) -> Event {
        Event::CallbackQuery(CallbackQueryEvent {
            update_id: 2,
            id: "cbq-1".into(),
            chat_id: ChatId(-100),
            message_id: Some(11),
            sender: sender(),
            data: data.map(str::to_string),
            date: 1_700_000_000,
        })
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Hello {
        hello: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct HistoryId(i64);

    #[test]
    fn test_scratch_state_roundtrip() {
        let ctx = Context::new(message("hi"), Arc::new(RecordingBot::default()));
        assert!(!ctx.has_state::<HistoryId>());

        ctx.set_state(HistoryId(42));
        assert_eq!(ctx.get_state::<HistoryId>(), Some(HistoryId(42)));

        ctx.set_state(HistoryId(43));
        assert_eq!(ctx.take_state::<HistoryId>(), Some(HistoryId(43)));
        assert!(ctx.get_state::<HistoryId>().is_none());
    }

    #[test]
    fn test_bind_callback_data() {
        let ctx = Context::new(
            callback(Some(r#"greet|{"hello":"world"}"#)),
            Arc::new(RecordingBot::default()),
        );
        let dst: Hello = ctx.bind_callback_data().unwrap();
        assert_eq!(dst.hello, "world");
    }

    #[test]
    fn test_bind_callback_data_is_idempotent() {
        let ctx = Context::new(
            callback(Some(r#"greet|{"hello":"world"}"#)),
            Arc::new(RecordingBot::default()),
        );
        let first: BindResult<Hello> = ctx.bind_callback_data();
        let second: BindResult<Hello> = ctx.bind_callback_data();
        assert_eq!(first, second);

        let ctx = Context::new(callback(Some("greet|{")), Arc::new(RecordingBot::default()));
        let first: BindResult<Hello> = ctx.bind_callback_data();
        let second: BindResult<Hello> = ctx.bind_callback_data();
        assert!(first.is_err());
        assert_eq!(first, second);
    }

    #[test]
    fn test_bind_fails_for_non_callback_event() {
        let ctx = Context::new(message("hi"), Arc::new(RecordingBot::default()));
        let err = ctx.bind_callback_data::<Hello>().unwrap_err();
        assert_eq!(err, BindError::NotCallbackQuery);
    }

    #[test]
    fn test_bind_fails_for_empty_payload() {
        for data in [None, Some("greet"), Some("greet|"), Some("greet|  ")] {
            let ctx = Context::new(callback(data), Arc::new(RecordingBot::default()));
            let err = ctx.bind_callback_data::<Hello>().unwrap_err();
            assert_eq!(err, BindError::EmptyPayload, "data: {data:?}");
        }
    }

    #[test]
    fn test_bind_fails_for_shape_mismatch() {
        let ctx = Context::new(
            callback(Some(r#"greet|{"goodbye":1}"#)),
            Arc::new(RecordingBot::default()),
        );
        let err = ctx.bind_callback_data::<Hello>().unwrap_err();
        assert!(matches!(err, BindError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_reply_fills_chat_and_quote() {
        let bot = Arc::new(RecordingBot::default());
        let ctx = Context::new(message("hi"), bot.clone());

        ctx.reply("hello", &ReplyOptions::html().quoted())
            .await
            .unwrap();

        let sent = bot.sent.lock();
        assert_eq!(sent[0].chat_id, ChatId(-100));
        assert_eq!(sent[0].reply_to_message_id, Some(10));
        assert_eq!(sent[0].parse_mode, Some(crate::outbound::ParseMode::Html));
    }

    #[tokio::test]
    async fn test_answer_callback_query_uses_query_id() {
        let bot = Arc::new(RecordingBot::default());
        let ctx = Context::new(callback(Some("noop")), bot.clone());

        ctx.answer_callback_query(CallbackAnswer::text("done"))
            .await
            .unwrap();

        assert_eq!(bot.answered.lock()[0].0, "cbq-1");
    }

    #[tokio::test]
    async fn test_reply_is_cancelled() {
        let ctx = Context::new(message("hi"), Arc::new(RecordingBot::default()));
        ctx.cancellation().cancel();

        let err = ctx.reply("hello", &ReplyOptions::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::Cancelled));
    }

    #[tokio::test]
    async fn test_reply_segments_paginates() {
        let bot = Arc::new(RecordingBot {
            limit: Some(64),
            ..Default::default()
        });
        let ctx = Context::new(message("hi"), bot.clone());
        let segments = vec!["a".repeat(30), "b".repeat(30), "c".repeat(30)];

        let delivery = ctx.reply_segments(&segments, &ReplyOptions::default()).await;

        assert!(delivery.is_complete());
        assert_eq!(delivery.total, 3);
        let sent = bot.sent.lock();
        assert!(sent[0].text.ends_with("(1/3)"));
        assert!(sent[2].text.ends_with("(3/3)"));
        assert!(sent.iter().all(|m| m.text.chars().count() <= 64));
    }

    #[tokio::test]
    async fn test_reply_segments_reports_partial_delivery() {
        let bot = Arc::new(RecordingBot {
            limit: Some(64),
            fail_from: Some(1),
            ..Default::default()
        });
        let ctx = Context::new(message("hi"), bot.clone());
        let segments = vec!["a".repeat(30), "b".repeat(30), "c".repeat(30)];

        let delivery = ctx.reply_segments(&segments, &ReplyOptions::default()).await;

        assert!(!delivery.is_complete());
        assert_eq!(delivery.sent.len(), 1);
        assert!(matches!(delivery.failed, Some((1, ApiError::Transport(_)))));
    }

    #[tokio::test]
    async fn test_reply_segments_single_chunk_has_no_indicator() {
        let bot = Arc::new(RecordingBot::default());
        let ctx = Context::new(message("hi"), bot.clone());

        let delivery = ctx
            .reply_segments(&["short", "", "text"], &ReplyOptions::default())
            .await;

        assert_eq!(delivery.total, 1);
        assert_eq!(bot.sent.lock()[0].text, "short\n\ntext");
    }
}
