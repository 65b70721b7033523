//! Event dispatcher.
//!
//! The [`Dispatcher`] owns the middleware chain and the handler registry and
//! turns one [`Event`] into one run of that pipeline:
//!
//! 1. A [`Context`] is created for the event. For callback queries the
//!    callback action is resolved first (action store, then inline data).
//! 2. Middleware runs in registration order; [`Flow::Stop`] ends the event.
//! 3. The first registration whose matcher (or callback action) matches is
//!    invoked. Later registrations are not consulted.
//! 4. Events nothing matched are dropped, logged at trace level.
//!
//! Errors and panics raised by middleware or handlers never escape
//! [`Dispatcher::dispatch`]; they are handed to the configured [`ErrorSink`].
//!
//! Registration goes through `&self` so the dispatcher can be shared as
//! `Arc<Dispatcher>` before the service starts. [`seal`](Dispatcher::seal)
//! (called by the service when it starts running) freezes the chain and the
//! registry; afterwards every registration fails with
//! [`DispatchError::Sealed`] and dispatch reads the frozen pipeline without
//! locking.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, error, span, trace};

use crate::bot::BoxedBot;
use crate::callback::{BoxedActionStore, CallbackAction};
use crate::context::Context;
use crate::error::{DispatchError, HandlerError, HandlerResult};
use crate::event::Event;
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::matcher::Matcher;
use crate::middleware::{BoxedMiddleware, Flow, Middleware};

// =============================================================================
// Error sink
// =============================================================================

/// Receives failures caught at the dispatch boundary.
pub trait ErrorSink: Send + Sync {
    /// Reports `error`, raised while processing `event`.
    fn report(&self, event: &Event, error: &HandlerError);
}

impl<F> ErrorSink for F
where
    F: Fn(&Event, &HandlerError) + Send + Sync,
{
    fn report(&self, event: &Event, error: &HandlerError) {
        (self)(event, error)
    }
}

/// Default sink: logs failures with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, event: &Event, error: &HandlerError) {
        error!(
            update_id = event.update_id(),
            chat_id = %event.chat_id(),
            event_kind = event.kind().as_str(),
            error = %error,
            "Event processing failed"
        );
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and returned `Ok`.
    Handled,
    /// The event passed the middleware chain but no registration matched.
    Unhandled,
    /// A middleware returned [`Flow::Stop`].
    Stopped,
    /// A middleware, handler, or the action store failed or panicked.
    Failed,
}

enum Route {
    Matcher(Matcher),
    Callback(String),
}

impl Route {
    fn matches(&self, event: &Event, action: Option<&CallbackAction>) -> bool {
        match self {
            Self::Matcher(m) => m.matches(event),
            Self::Callback(token) => action.is_some_and(|a| a.action == *token),
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::Matcher(m) => m.get_name().unwrap_or("matcher"),
            Self::Callback(token) => token,
        }
    }
}

struct Registration {
    route: Route,
    handler: BoxedHandler,
}

/// Middleware chain and handler registry, in registration order.
#[derive(Default, Clone)]
struct Pipeline {
    middlewares: Vec<BoxedMiddleware>,
    registrations: Vec<Arc<Registration>>,
}

/// The central event dispatcher.
pub struct Dispatcher {
    /// Registrations accepted while open; emptied by `seal`.
    pending: Mutex<Pipeline>,
    frozen: OnceLock<Arc<Pipeline>>,
    error_sink: Arc<dyn ErrorSink>,
    action_store: Option<BoxedActionStore>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher reporting failures to [`TracingErrorSink`].
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pipeline::default()),
            frozen: OnceLock::new(),
            error_sink: Arc::new(TracingErrorSink),
            action_store: None,
        }
    }

    /// Replaces the error sink (builder pattern).
    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    /// Sets the store used to resolve callback tokens (builder pattern).
    pub fn with_action_store(mut self, store: BoxedActionStore) -> Self {
        self.action_store = Some(store);
        self
    }

    /// Appends a middleware to the chain.
    pub fn use_middleware(&self, middleware: impl Middleware) -> Result<(), DispatchError> {
        let mut pending = self.open()?;
        pending.middlewares.push(Arc::new(middleware));
        Ok(())
    }

    /// Registers `handler` for events accepted by `matcher`.
    pub fn handle(&self, matcher: Matcher, handler: impl Handler) -> Result<(), DispatchError> {
        self.register(Route::Matcher(matcher), into_handler(handler))
    }

    /// Registers `handler` for callback queries whose action equals `action`.
    pub fn handle_callback_query(
        &self,
        action: impl Into<String>,
        handler: impl Handler,
    ) -> Result<(), DispatchError> {
        self.register(Route::Callback(action.into()), into_handler(handler))
    }

    fn register(&self, route: Route, handler: BoxedHandler) -> Result<(), DispatchError> {
        let mut pending = self.open()?;
        debug!(route = route.label(), "Registered handler");
        pending
            .registrations
            .push(Arc::new(Registration { route, handler }));
        Ok(())
    }

    /// Locks the pending registry, failing once sealed. `seal` freezes under
    /// the same lock, so nothing can be added after the freeze.
    fn open(&self) -> Result<MutexGuard<'_, Pipeline>, DispatchError> {
        let pending = self.pending.lock();
        if self.frozen.get().is_some() {
            return Err(DispatchError::Sealed);
        }
        Ok(pending)
    }

    /// Closes registration and freezes the pipeline. Idempotent.
    pub fn seal(&self) {
        let mut pending = self.pending.lock();
        if self.frozen.get().is_none() {
            let pipeline = std::mem::take(&mut *pending);
            debug!(
                middlewares = pipeline.middlewares.len(),
                handlers = pipeline.registrations.len(),
                "Dispatcher sealed"
            );
            let _ = self.frozen.set(Arc::new(pipeline));
        }
    }

    /// Returns `true` once registration is closed.
    pub fn is_sealed(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Returns the number of registered middlewares.
    pub fn middleware_count(&self) -> usize {
        self.pipeline().middlewares.len()
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.pipeline().registrations.len()
    }

    /// The frozen pipeline, or a snapshot of the pending one before sealing.
    fn pipeline(&self) -> Arc<Pipeline> {
        if let Some(frozen) = self.frozen.get() {
            return Arc::clone(frozen);
        }
        let pending = self.pending.lock();
        match self.frozen.get() {
            Some(frozen) => Arc::clone(frozen),
            None => Arc::new(pending.clone()),
        }
    }

    /// Dispatches `event` with a fresh cancellation token.
    pub async fn dispatch(&self, event: Event, bot: BoxedBot) -> DispatchOutcome {
        self.dispatch_with_cancellation(event, bot, CancellationToken::new())
            .await
    }

    /// Dispatches `event`; outbound calls made through the context observe
    /// `cancel`.
    pub async fn dispatch_with_cancellation(
        &self,
        event: Event,
        bot: BoxedBot,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            update_id = event.update_id(),
            chat_id = %event.chat_id(),
            event_kind = event.kind().as_str(),
        );

        async move {
            let ctx = match self.build_context(event, bot, cancel).await {
                Ok(ctx) => Arc::new(ctx),
                Err((event, e)) => {
                    self.error_sink.report(&event, &e);
                    return DispatchOutcome::Failed;
                }
            };

            match self.run(&ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.error_sink.report(ctx.event(), &e);
                    DispatchOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn build_context(
        &self,
        event: Event,
        bot: BoxedBot,
        cancel: CancellationToken,
    ) -> Result<Context, (Event, HandlerError)> {
        let token = event
            .as_callback_query()
            .and_then(|q| q.data.clone())
            .filter(|_| self.action_store.is_some());

        let resolved = match (&self.action_store, token) {
            (Some(store), Some(token)) => match store.lookup(&token).await {
                Ok(found) => found,
                Err(e) => return Err((event, e)),
            },
            _ => None,
        };

        let mut ctx = Context::new(event, bot).with_cancellation(cancel);
        if let Some(action) = resolved {
            trace!(action = %action.action, "Resolved callback action from store");
            ctx = ctx.with_callback_action(action);
        }
        Ok(ctx)
    }

    async fn run(&self, ctx: &Arc<Context>) -> HandlerResult<DispatchOutcome> {
        let pipeline = self.pipeline();
        for (i, middleware) in pipeline.middlewares.iter().enumerate() {
            let flow = catch_panic(middleware.handle(Arc::clone(ctx))).await?;
            if flow == Flow::Stop {
                debug!(middleware_index = i, "Middleware stopped the event");
                return Ok(DispatchOutcome::Stopped);
            }
        }

        let event = ctx.event();
        let matched = pipeline
            .registrations
            .iter()
            .find(|r| r.route.matches(event, ctx.callback_action()));

        let Some(registration) = matched else {
            trace!(
                action = ctx.callback_action().map(|a| a.action.as_str()),
                "No handler matched, event dropped"
            );
            return Ok(DispatchOutcome::Unhandled);
        };

        trace!(route = registration.route.label(), "Invoking handler");
        catch_panic((registration.handler)(Arc::clone(ctx))).await?;
        Ok(DispatchOutcome::Handled)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("middleware_count", &self.middleware_count())
            .field("handler_count", &self.handler_count())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

async fn catch_panic<T>(
    fut: impl std::future::Future<Output = HandlerResult<T>>,
) -> HandlerResult<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use crate::callback::CallbackActionStore;
    use crate::error::{ApiResult, BindError};
    use crate::event::{CallbackQueryEvent, ChatId, MessageEvent, Sender, UserId};
    use crate::outbound::{CallbackAnswer, MessageReceipt, OutboundMessage};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockBot;

    #[async_trait]
    impl Bot for MockBot {
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

    fn mock_bot() -> BoxedBot {
        Arc::new(MockBot)
    }

    fn message(text: &str) -> Event {
        Event::Message(MessageEvent {
            update_id: 1,
            message_id: 1,
            chat_id: ChatId(42),
            sender: None,
            text: text.into(),
            date: 0,
            reply_to_message_id: None,
        })
    }

    fn callback(data: &str) -> Event {
        Event::CallbackQuery(CallbackQueryEvent {
            update_id: 2,
            id: "cbq".into(),
            chat_id: ChatId(42),
            message_id: Some(5),
            sender: Sender {
                id: UserId(9),
                username: None,
                is_bot: false,
            },
            data: Some(data.into()),
            date: 0,
        })
    }

    fn recording_middleware(
        log: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Middleware {
        move |_ctx: Arc<Context>| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(name);
                Ok(Flow::Continue)
            }
        }
    }

    fn collecting_sink() -> (Arc<Mutex<Vec<String>>>, impl ErrorSink + 'static) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink_errors = Arc::clone(&errors);
        let sink = move |_event: &Event, e: &HandlerError| sink_errors.lock().push(e.to_string());
        (errors, sink)
    }

    #[tokio::test]
    async fn test_middleware_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "a")).unwrap();
        dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "b")).unwrap();
        dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "c")).unwrap();

        for _ in 0..3 {
            dispatcher.dispatch(message("hi"), mock_bot()).await;
        }

        assert_eq!(*log.lock(), ["a", "b", "c"].repeat(3));
    }

    #[tokio::test]
    async fn test_stop_short_circuits_chain_and_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handled = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new();

        dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "first")).unwrap();
        dispatcher
            .use_middleware(|_ctx: Arc<Context>| async { Ok(Flow::Stop) })
            .unwrap();
        dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "never")).unwrap();

        let h = Arc::clone(&handled);
        dispatcher
            .handle(Matcher::kind(crate::EventKind::Message), move |_ctx: Arc<Context>| {
                let h = Arc::clone(&h);
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let outcome = dispatcher.dispatch(message("hi"), mock_bot()).await;

        assert_eq!(outcome, DispatchOutcome::Stopped);
        assert_eq!(*log.lock(), vec!["first"]);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_matching_registration_wins() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();

        for (name, matcher) in [
            ("recap", Matcher::command("recap")),
            ("prefix", Matcher::prefix("/")),
            ("any", Matcher::kind(crate::EventKind::Message)),
        ] {
            let hits = Arc::clone(&hits);
            dispatcher
                .handle(matcher, move |_ctx: Arc<Context>| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.lock().push(name);
                        Ok(())
                    }
                })
                .unwrap();
        }

        dispatcher.dispatch(message("/recap"), mock_bot()).await;
        dispatcher.dispatch(message("/other"), mock_bot()).await;
        dispatcher.dispatch(message("plain"), mock_bot()).await;

        assert_eq!(*hits.lock(), vec!["recap", "prefix", "any"]);
    }

    #[tokio::test]
    async fn test_unregistered_callback_is_dropped_silently() {
        let (errors, sink) = collecting_sink();
        let dispatcher = Dispatcher::new().with_error_sink(sink);
        dispatcher
            .handle_callback_query("summarize", |_ctx: Arc<Context>| async { Ok(()) })
            .unwrap();

        let outcome = dispatcher.dispatch(callback("recap:chat123"), mock_bot()).await;

        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert!(errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_callback_routes_by_action_and_binds_payload() {
        #[derive(Deserialize)]
        struct Page {
            page: u32,
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new();
        let s = Arc::clone(&seen);
        dispatcher
            .handle_callback_query("page", move |ctx: Arc<Context>| {
                let s = Arc::clone(&s);
                async move {
                    let page: Page = ctx.bind_callback_data()?;
                    s.store(page.page as usize, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let outcome = dispatcher.dispatch(callback(r#"page|{"page":4}"#), mock_bot()).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_action_store_overrides_inline_parse() {
        struct Store;

        #[async_trait]
        impl CallbackActionStore for Store {
            async fn lookup(&self, token: &str) -> HandlerResult<Option<CallbackAction>> {
                Ok((token == "tok-1").then(|| CallbackAction {
                    action: "summarize".into(),
                    payload: Some(r#"{"hours":6}"#.into()),
                }))
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new().with_action_store(Arc::new(Store));
        let h = Arc::clone(&hits);
        dispatcher
            .handle_callback_query("summarize", move |_ctx: Arc<Context>| {
                let h = Arc::clone(&h);
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(
            dispatcher.dispatch(callback("tok-1"), mock_bot()).await,
            DispatchOutcome::Handled
        );
        // Store miss falls back to the inline form.
        assert_eq!(
            dispatcher.dispatch(callback("summarize"), mock_bot()).await,
            DispatchOutcome::Handled
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_contained() {
        let (errors, sink) = collecting_sink();
        let dispatcher = Dispatcher::new().with_error_sink(sink);

        dispatcher
            .handle(Matcher::command("fail"), |_ctx: Arc<Context>| async {
                Err(HandlerError::from(BindError::EmptyPayload))
            })
            .unwrap();
        dispatcher
            .handle(Matcher::command("panic"), |_ctx: Arc<Context>| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap();
        dispatcher
            .handle(Matcher::command("ok"), |_ctx: Arc<Context>| async { Ok(()) })
            .unwrap();

        assert_eq!(
            dispatcher.dispatch(message("/fail"), mock_bot()).await,
            DispatchOutcome::Failed
        );
        assert_eq!(
            dispatcher.dispatch(message("/panic"), mock_bot()).await,
            DispatchOutcome::Failed
        );
        assert_eq!(
            dispatcher.dispatch(message("/ok"), mock_bot()).await,
            DispatchOutcome::Handled
        );

        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("boom"));
    }

    #[tokio::test]
    async fn test_sealed_dispatcher_rejects_registration() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .use_middleware(|_ctx: Arc<Context>| async { Ok(Flow::Continue) })
            .unwrap();
        dispatcher.seal();

        let err = dispatcher
            .use_middleware(|_ctx: Arc<Context>| async { Ok(Flow::Continue) })
            .unwrap_err();
        assert_eq!(err, DispatchError::Sealed);
        let late = dispatcher
            .handle(Matcher::command("late"), |_ctx: Arc<Context>| async { Ok(()) });
        assert!(late.is_err());
        assert_eq!(dispatcher.middleware_count(), 1);
        assert_eq!(dispatcher.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_seal_racing_registration_keeps_accepted_middleware_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new();

        let accepted = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let calls = Arc::clone(&calls);
                    let dispatcher = &dispatcher;
                    scope.spawn(move || {
                        let mut accepted = 0usize;
                        for _ in 0..200 {
                            let calls = Arc::clone(&calls);
                            let result = dispatcher.use_middleware(move |_ctx: Arc<Context>| {
                                let calls = Arc::clone(&calls);
                                async move {
                                    calls.fetch_add(1, Ordering::SeqCst);
                                    Ok(Flow::Continue)
                                }
                            });
                            if result.is_ok() {
                                accepted += 1;
                            }
                        }
                        accepted
                    })
                })
                .collect();
            dispatcher.seal();
            workers
                .into_iter()
                .map(|w| w.join().unwrap_or_default())
                .sum::<usize>()
        });

        assert!(dispatcher.is_sealed());
        assert_eq!(dispatcher.middleware_count(), accepted);
        dispatcher.dispatch(message("hi"), mock_bot()).await;
        assert_eq!(calls.load(Ordering::SeqCst), accepted);
    }

    #[tokio::test]
    async fn test_sealing_freezes_pipeline_for_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "a")).unwrap();
        dispatcher.seal();
        dispatcher.seal();

        assert!(dispatcher.use_middleware(recording_middleware(Arc::clone(&log), "b")).is_err());
        dispatcher.dispatch(message("hi"), mock_bot()).await;
        dispatcher.dispatch(message("hi"), mock_bot()).await;

        assert_eq!(*log.lock(), vec!["a", "a"]);
        assert_eq!(dispatcher.middleware_count(), 1);
    }
}
