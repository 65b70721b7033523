//! Handler trait.
//!
//! A handler receives the per-event [`Context`] and returns a
//! [`HandlerResult`]. Any async closure or function taking `Arc<Context>`
//! qualifies:
//!
//! ```rust,ignore
//! async fn start(ctx: Arc<Context>) -> HandlerResult {
//!     ctx.reply("hi", &ReplyOptions::default()).await?;
//!     Ok(())
//! }
//!
//! dispatcher.handle(Matcher::command("start"), start)?;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::error::HandlerResult;

/// An event handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles the event wrapped by `ctx`.
    async fn call(&self, ctx: Arc<Context>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, ctx: Arc<Context>) -> HandlerResult {
        (self)(ctx).await
    }
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler =
    Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Converts a handler into a boxed handler.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    let handler = Arc::new(handler);
    Arc::new(move |ctx| {
        let handler = Arc::clone(&handler);
        Box::pin(async move { handler.call(ctx).await })
    })
}
