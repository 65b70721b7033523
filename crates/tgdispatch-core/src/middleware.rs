//! Middleware chain.
//!
//! Middleware runs before handler selection, in registration order, for every
//! event. Each one returns a [`Flow`]: `Continue` hands the event to the next
//! middleware (and eventually a handler), `Stop` ends processing of the event
//! without an error.
//!
//! Plain async closures are middleware:
//!
//! ```rust,ignore
//! dispatcher.use_middleware(|ctx: Arc<Context>| async move {
//!     if ctx.event().sender().is_some_and(|s| s.is_bot) {
//!         return Ok(Flow::Stop);
//!     }
//!     Ok(Flow::Continue)
//! })?;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::context::Context;
use crate::error::HandlerResult;
use crate::event::Event;

/// What the chain should do after a middleware returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next middleware, then the matched handler.
    Continue,
    /// Stop processing this event.
    Stop,
}

/// A step of the middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Processes the event wrapped by `ctx`.
    async fn handle(&self, ctx: Arc<Context>) -> HandlerResult<Flow>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Flow>> + Send + 'static,
{
    async fn handle(&self, ctx: Arc<Context>) -> HandlerResult<Flow> {
        (self)(ctx).await
    }
}

/// A type-erased middleware stored by the dispatcher.
pub type BoxedMiddleware = Arc<dyn Middleware>;

// =============================================================================
// History recording
// =============================================================================

/// Persists chat history for later retrieval.
///
/// Implemented by the storage layer.
#[async_trait]
pub trait MessageRecorder: Send + Sync {
    /// Records a new message event.
    async fn record(&self, event: &Event) -> HandlerResult;

    /// Updates a previously recorded message after it was edited.
    async fn sync_edited(&self, event: &Event) -> HandlerResult;
}

/// Middleware recording every message and edit through a [`MessageRecorder`].
///
/// Callback queries pass through untouched. A recorder failure aborts the
/// event and is reported to the dispatcher's error sink.
pub struct RecordMessage<R> {
    recorder: Arc<R>,
}

impl<R: MessageRecorder> RecordMessage<R> {
    /// Creates the middleware.
    pub fn new(recorder: Arc<R>) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl<R: MessageRecorder + 'static> Middleware for RecordMessage<R> {
    async fn handle(&self, ctx: Arc<Context>) -> HandlerResult<Flow> {
        let event = ctx.event();
        match event {
            Event::Message(_) => self.recorder.record(event).await?,
            Event::EditedMessage(_) => self.recorder.sync_edited(event).await?,
            Event::CallbackQuery(_) => return Ok(Flow::Continue),
        }

        trace!(
            update_id = event.update_id(),
            event_kind = event.kind().as_str(),
            "Recorded message"
        );
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use crate::error::{ApiResult, HandlerError};
    use crate::event::{ChatId, MessageEvent};
    use crate::outbound::{CallbackAnswer, MessageReceipt, OutboundMessage};
    use parking_lot::Mutex;

    struct NullBot;

    #[async_trait]
    impl Bot for NullBot {
        async fn send(&self, message: OutboundMessage) -> ApiResult<MessageReceipt> {
            Ok(MessageReceipt {
                chat_id: message.chat_id,
                message_id: 1,
            })
        }

        async fn answer_callback(&self, _id: &str, _answer: CallbackAnswer) -> ApiResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryRecorder {
        recorded: Mutex<Vec<i64>>,
        edited: Mutex<Vec<i64>>,
        broken: bool,
    }

    #[async_trait]
    impl MessageRecorder for MemoryRecorder {
        async fn record(&self, event: &Event) -> HandlerResult {
            if self.broken {
                return Err(HandlerError::collaborator("history store offline"));
            }
            self.recorded.lock().push(event.update_id());
            Ok(())
        }

        async fn sync_edited(&self, event: &Event) -> HandlerResult {
            self.edited.lock().push(event.update_id());
            Ok(())
        }
    }

    fn message_event(update_id: i64) -> MessageEvent {
        MessageEvent {
            update_id,
            message_id: update_id * 10,
            chat_id: ChatId(1),
            sender: None,
            text: "hello".into(),
            date: 0,
            reply_to_message_id: None,
        }
    }

    fn ctx(event: Event) -> Arc<Context> {
        Arc::new(Context::new(event, Arc::new(NullBot)))
    }

    #[tokio::test]
    async fn test_closure_is_middleware() {
        let mw: BoxedMiddleware = Arc::new(|_ctx: Arc<Context>| async { Ok(Flow::Stop) });
        let flow = mw.handle(ctx(Event::Message(message_event(1)))).await.unwrap();
        assert_eq!(flow, Flow::Stop);
    }

    #[tokio::test]
    async fn test_record_message_routes_by_kind() {
        let recorder = Arc::new(MemoryRecorder::default());
        let mw = RecordMessage::new(Arc::clone(&recorder));

        mw.handle(ctx(Event::Message(message_event(1)))).await.unwrap();
        mw.handle(ctx(Event::EditedMessage(message_event(2)))).await.unwrap();

        assert_eq!(*recorder.recorded.lock(), vec![1]);
        assert_eq!(*recorder.edited.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_record_message_surfaces_failures() {
        let recorder = Arc::new(MemoryRecorder {
            broken: true,
            ..Default::default()
        });
        let mw = RecordMessage::new(recorder);

        let err = mw.handle(ctx(Event::Message(message_event(1)))).await.unwrap_err();
        assert!(matches!(err, HandlerError::Collaborator(_)));
    }
}
