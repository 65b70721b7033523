//! Outbound delivery with throttling and retries.
//!
//! [`Courier`] is the [`Bot`] handed to handlers. Every platform call first
//! takes a token from the shared [`RateLimiter`], then:
//!
//! - a throttling response is retried exactly once, after the advertised delay
//! - a transport failure is retried with exponential backoff up to
//!   `max_attempts` total attempts
//! - anything else surfaces to the caller immediately

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tgdispatch_core::{
    AcquireError, ApiError, ApiResult, Bot, BoxedPlatformApi, CallbackAnswer, MAX_MESSAGE_LENGTH,
    MessageReceipt, OutboundMessage, RateLimiter,
};

use crate::config::{RateLimitConfig, RetryConfig};

/// Backoff schedule for transport failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// Rate-limited, retrying [`Bot`] over a raw [`PlatformApi`](tgdispatch_core::PlatformApi).
pub struct Courier {
    api: BoxedPlatformApi,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    max_wait: Duration,
    max_message_length: usize,
    cancel: CancellationToken,
}

impl Courier {
    /// Creates a courier sharing `limiter` with any other courier of the bot.
    pub fn new(
        api: BoxedPlatformApi,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        max_wait: Duration,
    ) -> Self {
        Self {
            api,
            limiter,
            policy,
            max_wait,
            max_message_length: MAX_MESSAGE_LENGTH,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a courier and its limiter from configuration.
    pub fn from_config(
        api: BoxedPlatformApi,
        rate_limit: &RateLimitConfig,
        retry: &RetryConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(rate_limit.capacity, rate_limit.refill_per_sec));
        Self::new(api, limiter, RetryPolicy::from(retry), rate_limit.max_wait())
    }

    /// Sets the length reported to handlers for splitting.
    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    /// Aborts waits and retry pauses when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the shared rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn take_token(&self) -> ApiResult<()> {
        match tokio::time::timeout(self.max_wait, self.limiter.acquire(&self.cancel)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(AcquireError::Cancelled)) => Err(ApiError::Cancelled),
            Err(_) => Err(ApiError::RateLimiterTimeout(self.max_wait)),
        }
    }

    async fn pause(&self, delay: Duration) -> ApiResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn deliver<T, F, Fut>(&self, method: &'static str, call: F) -> ApiResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 1;
        let mut throttled = false;

        loop {
            self.take_token().await?;

            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match error {
                ApiError::TooManyRequests { retry_after } if !throttled => {
                    throttled = true;
                    warn!(
                        method,
                        retry_after = ?retry_after,
                        "Throttled by platform, retrying once"
                    );
                    self.pause(retry_after).await?;
                }
                e if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        method,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Transient delivery failure, retrying"
                    );
                    attempt += 1;
                    self.pause(delay).await?;
                }
                e => {
                    debug!(method, attempt, error = %e, "Delivery failed");
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("policy", &self.policy)
            .field("max_wait", &self.max_wait)
            .field("max_message_length", &self.max_message_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bot for Courier {
    async fn send(&self, message: OutboundMessage) -> ApiResult<MessageReceipt> {
        self.deliver("sendMessage", || self.api.send_message(&message))
            .await
    }

    async fn answer_callback(&self, callback_id: &str, answer: CallbackAnswer) -> ApiResult<()> {
        self.deliver("answerCallbackQuery", || {
            self.api.answer_callback_query(callback_id, &answer)
        })
        .await
    }

    fn max_message_length(&self) -> usize {
        self.max_message_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tgdispatch_core::{BotIdentity, ChatId, PlatformApi, UpdateBatch, UserId};

    /// Answers `sendMessage` from a script, then succeeds.
    #[derive(Default)]
    struct FlakyApi {
        script: Mutex<VecDeque<ApiError>>,
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    impl FlakyApi {
        fn with(errors: impl IntoIterator<Item = ApiError>) -> Arc<Self> {
            let api = Self::default();
            api.script.lock().extend(errors);
            Arc::new(api)
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl PlatformApi for FlakyApi {
        async fn get_me(&self) -> ApiResult<BotIdentity> {
            Ok(BotIdentity {
                id: UserId(1),
                username: "bot".into(),
            })
        }

        async fn send_message(&self, message: &OutboundMessage) -> ApiResult<MessageReceipt> {
            self.calls.lock().push(tokio::time::Instant::now());
            let next = self.script.lock().pop_front();
            match next {
                Some(error) => Err(error),
                None => Ok(MessageReceipt {
                    chat_id: message.chat_id,
                    message_id: 77,
                }),
            }
        }

        async fn answer_callback_query(&self, _: &str, _: &CallbackAnswer) -> ApiResult<()> {
            self.calls.lock().push(tokio::time::Instant::now());
            Ok(())
        }

        async fn get_updates(&self, _: Option<i64>, _: Duration) -> ApiResult<UpdateBatch> {
            Ok(UpdateBatch::default())
        }

        async fn set_webhook(&self, _: &str, _: Option<&str>) -> ApiResult<()> {
            Ok(())
        }

        async fn delete_webhook(&self) -> ApiResult<()> {
            Ok(())
        }
    }

    fn courier(api: Arc<FlakyApi>) -> Courier {
        Courier::new(
            api,
            Arc::new(RateLimiter::new(30, 30.0)),
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier: 2.0,
            },
            Duration::from_secs(5),
        )
    }

    fn throttled(secs: u64) -> ApiError {
        ApiError::TooManyRequests {
            retry_after: Duration::from_secs(secs),
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage::new(ChatId(1), "hello")
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_send_retries_once_after_delay() {
        let api = FlakyApi::with([throttled(2)]);
        let courier = courier(api.clone());

        let receipt = courier.send(message()).await.unwrap();

        assert_eq!(receipt.message_id, 77);
        let calls = api.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_throttle_surfaces() {
        let api = FlakyApi::with([throttled(1), throttled(1)]);
        let courier = courier(api.clone());

        let err = courier.send(message()).await.unwrap_err();

        assert!(matches!(err, ApiError::TooManyRequests { .. }));
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_back_off_exponentially() {
        let api = FlakyApi::with([ApiError::transport("reset"), ApiError::transport("reset")]);
        let courier = courier(api.clone());

        courier.send(message()).await.unwrap();

        let calls = api.calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_millis(100));
        assert!(calls[2] - calls[1] >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_exhaust_attempts() {
        let api = FlakyApi::with((0..5).map(|_| ApiError::transport("down")));
        let courier = courier(api.clone());

        let err = courier.send(message()).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let api = FlakyApi::with([ApiError::Rejected {
            code: 400,
            description: "Bad Request: chat not found".into(),
        }]);
        let courier = courier(api.clone());

        let err = courier.send(message()).await.unwrap_err();

        assert!(matches!(err, ApiError::Rejected { code: 400, .. }));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_wait_is_bounded() {
        let api = FlakyApi::with([]);
        let courier = Courier::new(
            api.clone(),
            Arc::new(RateLimiter::new(1, 0.1)),
            RetryPolicy::default(),
            Duration::from_millis(500),
        );

        courier.send(message()).await.unwrap();
        let err = courier.send(message()).await.unwrap_err();

        assert!(matches!(err, ApiError::RateLimiterTimeout(d) if d == Duration::from_millis(500)));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_for_token() {
        let api = FlakyApi::with([]);
        let courier = Courier::new(
            api.clone(),
            Arc::new(RateLimiter::new(1, 1.0)),
            RetryPolicy::default(),
            Duration::from_secs(5),
        );
        courier.send(message()).await.unwrap();

        let mut send = tokio_test::task::spawn(courier.send(message()));
        tokio_test::assert_pending!(send.poll());
        assert_eq!(api.call_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio_test::assert_ready_ok!(send.poll());
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_retry_pause() {
        let api = FlakyApi::with([throttled(60)]);
        let cancel = CancellationToken::new();
        let courier = courier(api.clone()).with_cancellation(cancel.clone());

        let send = tokio::spawn(async move { courier.send(message()).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Cancelled));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_callback_goes_through_limiter() {
        let api = FlakyApi::with([]);
        let courier = courier(api.clone());
        let before = courier.limiter().available();

        courier
            .answer_callback("q1", CallbackAnswer::default())
            .await
            .unwrap();

        assert_eq!(api.call_count(), 1);
        assert_eq!(courier.limiter().available(), before - 1);
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }
}
