//! Long-poll update loop.
//!
//! Repeatedly calls `getUpdates` with the last confirmed offset and pushes the
//! decoded events into the intake channel. The offset only advances on the
//! next request, so events fetched but not yet queued when the loop is
//! cancelled are redelivered on the next start.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tgdispatch_core::{ApiError, BoxedPlatformApi, Event};

/// Settings for [`LongPoller`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Server-side wait of each `getUpdates` call.
    pub timeout: Duration,
    /// First delay after a failed call.
    pub initial_delay: Duration,
    /// Upper bound of the failure delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each consecutive failure.
    pub backoff_multiplier: f64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Pulls updates from the platform until cancelled.
pub struct LongPoller {
    api: BoxedPlatformApi,
    options: PollOptions,
}

impl LongPoller {
    /// Creates a poller.
    pub fn new(api: BoxedPlatformApi, options: PollOptions) -> Self {
        Self { api, options }
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self, events: mpsc::Sender<Event>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }

    /// Runs the loop until `cancel` fires or the intake channel closes.
    pub async fn run(self, events: mpsc::Sender<Event>, cancel: CancellationToken) {
        info!(timeout = ?self.options.timeout, "Long polling started");

        let mut offset: Option<i64> = None;
        let mut current_delay = self.options.initial_delay;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.api.get_updates(offset, self.options.timeout) => result,
            };

            let batch = match result {
                Ok(batch) => {
                    current_delay = self.options.initial_delay;
                    batch
                }
                Err(e) => {
                    let delay = match &e {
                        ApiError::TooManyRequests { retry_after } => *retry_after,
                        _ => {
                            let delay = current_delay;
                            current_delay = std::cmp::min(
                                Duration::from_secs_f64(
                                    current_delay.as_secs_f64() * self.options.backoff_multiplier,
                                ),
                                self.options.max_delay,
                            );
                            delay
                        }
                    };
                    warn!(error = %e, delay = ?delay, "getUpdates failed, retrying");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if let Some(next) = batch.next_offset {
                offset = Some(next);
            }
            debug!(count = batch.events.len(), offset = ?offset, "Fetched updates");

            for event in batch.events {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Long polling stopped");
                        return;
                    }
                    sent = events.send(event) => {
                        if sent.is_err() {
                            info!("Intake closed, long polling stopped");
                            return;
                        }
                    }
                }
            }
        }

        info!("Long polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tgdispatch_core::{
        ApiResult, BotIdentity, CallbackAnswer, ChatId, MessageEvent, MessageReceipt,
        OutboundMessage, PlatformApi, UpdateBatch, UserId,
    };

    #[derive(Default)]
    struct ScriptedApi {
        responses: Mutex<VecDeque<ApiResult<UpdateBatch>>>,
        offsets: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl PlatformApi for ScriptedApi {
        async fn get_me(&self) -> ApiResult<BotIdentity> {
            Ok(BotIdentity {
                id: UserId(1),
                username: "bot".into(),
            })
        }

        async fn send_message(&self, message: &OutboundMessage) -> ApiResult<MessageReceipt> {
            Ok(MessageReceipt {
                chat_id: message.chat_id,
                message_id: 1,
            })
        }

        async fn answer_callback_query(&self, _: &str, _: &CallbackAnswer) -> ApiResult<()> {
            Ok(())
        }

        async fn get_updates(
            &self,
            offset: Option<i64>,
            timeout: Duration,
        ) -> ApiResult<UpdateBatch> {
            self.offsets.lock().push(offset);
            let next = self.responses.lock().pop_front();
            match next {
                Some(response) => response,
                None => {
                    // Behave like an idle long poll.
                    tokio::time::sleep(timeout).await;
                    Ok(UpdateBatch::default())
                }
            }
        }

        async fn set_webhook(&self, _: &str, _: Option<&str>) -> ApiResult<()> {
            Ok(())
        }

        async fn delete_webhook(&self) -> ApiResult<()> {
            Ok(())
        }
    }

    fn event(update_id: i64) -> Event {
        Event::Message(MessageEvent {
            update_id,
            message_id: update_id,
            chat_id: ChatId(1),
            sender: None,
            text: format!("m{update_id}"),
            date: 0,
            reply_to_message_id: None,
        })
    }

    fn batch(ids: &[i64]) -> UpdateBatch {
        UpdateBatch {
            events: ids.iter().copied().map(event).collect(),
            next_offset: ids.iter().max().map(|id| id + 1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offsets_advance_and_events_are_forwarded() {
        let api = Arc::new(ScriptedApi::default());
        api.responses.lock().extend([
            Ok(batch(&[10, 11])),
            Err(ApiError::transport("connection reset")),
            Ok(batch(&[12])),
        ]);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = LongPoller::new(api.clone(), PollOptions::default()).spawn(tx, cancel.clone());

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().update_id());
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(seen, vec![10, 11, 12]);
        let offsets = api.offsets.lock();
        assert_eq!(&offsets[..3], &[None, Some(12), Some(12)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_waits_for_retry_after() {
        let api = Arc::new(ScriptedApi::default());
        api.responses.lock().extend([
            Err(ApiError::TooManyRequests {
                retry_after: Duration::from_secs(5),
            }),
            Ok(batch(&[1])),
        ]);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let handle = LongPoller::new(api, PollOptions::default()).spawn(tx, cancel.clone());

        rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_intake_closes() {
        let api = Arc::new(ScriptedApi::default());
        api.responses.lock().push_back(Ok(batch(&[1, 2])));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle =
            LongPoller::new(api, PollOptions::default()).spawn(tx, CancellationToken::new());

        handle.await.unwrap();
    }
}
