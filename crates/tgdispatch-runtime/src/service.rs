//! Bot service lifecycle.
//!
//! ```text
//! Created ──start──▶ Connecting ──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                        │                                           ▲
//!                        └────────── getMe / transport failure ──────┘
//! ```
//!
//! While running, the active transport (webhook listener or long poller)
//! pushes events into a bounded queue. The dispatch loop pulls from that queue
//! only while fewer than `max_in_flight` dispatches are running, so a full
//! pipeline backs up into the queue and from there into the transport.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::signal;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tgdispatch_core::{
    ApiResult, Bot, BotIdentity, BoxedBot, BoxedPlatformApi, CallbackAnswer, DispatchOutcome,
    Dispatcher, Event, MessageReceipt, OutboundMessage,
};
use tgdispatch_transport::polling::LongPoller;
use tgdispatch_transport::webhook::{self, ListenerHandle};
use tgdispatch_transport::{ClientOptions, TelegramClient};

use crate::config::{TgDispatchConfig, TransportMode, validate_config};
use crate::delivery::Courier;
use crate::error::{RuntimeError, RuntimeResult};

/// Lifecycle state of a [`BotService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Created,
    Connecting,
    Running,
    Stopping,
    Stopped,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Inbound {
    Webhook(ListenerHandle),
    Polling(JoinHandle<()>),
}

struct Running {
    inbound: Inbound,
    dispatch_loop: JoinHandle<()>,
}

/// Owns the transport, the dispatch loop and outbound delivery of one bot.
pub struct BotService {
    config: TgDispatchConfig,
    api: BoxedPlatformApi,
    dispatcher: Arc<Dispatcher>,
    courier: Arc<Courier>,
    state: watch::Sender<BotState>,
    identity: OnceLock<BotIdentity>,
    /// Fired when stopping: no new events are admitted.
    intake: CancellationToken,
    /// Fired when the grace period ends: in-flight work is aborted.
    abandon: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl BotService {
    /// Creates a service talking to the Bot API over HTTP.
    pub fn new(config: TgDispatchConfig, dispatcher: Arc<Dispatcher>) -> RuntimeResult<Self> {
        validate_config(&config)?;
        let client = TelegramClient::new(
            &config.bot.token,
            ClientOptions {
                api_base: config.bot.api_base.clone(),
                request_timeout: config.bot.request_timeout(),
            },
        )?;
        Self::with_api(config, dispatcher, Arc::new(client))
    }

    /// Creates a service over a custom [`PlatformApi`](tgdispatch_core::PlatformApi).
    pub fn with_api(
        config: TgDispatchConfig,
        dispatcher: Arc<Dispatcher>,
        api: BoxedPlatformApi,
    ) -> RuntimeResult<Self> {
        validate_config(&config)?;

        let abandon = CancellationToken::new();
        let courier = Courier::from_config(api.clone(), &config.rate_limit, &config.retry)
            .with_max_message_length(config.bot.max_message_length)
            .with_cancellation(abandon.clone());

        Ok(Self {
            config,
            api,
            dispatcher,
            courier: Arc::new(courier),
            state: watch::Sender::new(BotState::Created),
            identity: OnceLock::new(),
            intake: CancellationToken::new(),
            abandon,
            running: Mutex::new(None),
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> BotState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    pub fn watch_state(&self) -> watch::Receiver<BotState> {
        self.state.subscribe()
    }

    /// Returns the bot identity once `getMe` succeeded.
    pub fn identity(&self) -> Option<&BotIdentity> {
        self.identity.get()
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns the rate-limited bot handle used for all outbound calls.
    pub fn bot(&self) -> BoxedBot {
        self.courier.clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TgDispatchConfig {
        &self.config
    }

    /// Returns the webhook listener address while running in webhook mode.
    pub async fn webhook_addr(&self) -> Option<SocketAddr> {
        match &self.running.lock().await.as_ref()?.inbound {
            Inbound::Webhook(listener) => Some(listener.local_addr()),
            Inbound::Polling(_) => None,
        }
    }

    /// Sends a message through the rate limiter with retries.
    pub async fn send(&self, message: OutboundMessage) -> ApiResult<MessageReceipt> {
        self.courier.send(message).await
    }

    /// Answers a callback query through the rate limiter with retries.
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        answer: CallbackAnswer,
    ) -> ApiResult<()> {
        self.courier.answer_callback(callback_id, answer).await
    }

    fn transition(
        &self,
        operation: &'static str,
        from: BotState,
        to: BotState,
    ) -> RuntimeResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                result = Err(RuntimeError::InvalidState {
                    operation,
                    state: *state,
                });
                false
            }
        });
        if result.is_ok() {
            debug!(from = %from, to = %to, "State transition");
        }
        result
    }

    /// Verifies credentials, installs the transport and starts dispatching.
    ///
    /// Any failure leaves the service in [`BotState::Stopped`].
    pub async fn start(&self) -> RuntimeResult<()> {
        self.transition("start", BotState::Created, BotState::Connecting)?;

        match self.connect().await {
            Ok(()) => {
                self.transition("start", BotState::Connecting, BotState::Running)?;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start bot service");
                self.state.send_replace(BotState::Stopped);
                Err(e)
            }
        }
    }

    async fn connect(&self) -> RuntimeResult<()> {
        let identity = self
            .api
            .get_me()
            .await
            .map_err(|e| RuntimeError::api("getMe", e))?;
        info!(bot_id = identity.id.0, username = %identity.username, "Credentials verified");
        let _ = self.identity.set(identity);

        let (tx, rx) = mpsc::channel(self.config.dispatch.queue_capacity);

        let inbound = match self.config.transport.mode {
            TransportMode::Webhook => {
                let webhook = &self.config.transport.webhook;
                let listener = webhook::serve(
                    &webhook.bind_addr(),
                    &webhook.path,
                    webhook.secret.clone(),
                    tx,
                )
                .await?;
                if let Err(e) = self
                    .api
                    .set_webhook(&webhook.url, webhook.secret.as_deref())
                    .await
                {
                    listener.shutdown().await;
                    return Err(RuntimeError::api("setWebhook", e));
                }
                info!(url = %webhook.url, "Webhook registered");
                Inbound::Webhook(listener)
            }
            TransportMode::Polling => {
                // Long polling is refused while a webhook is registered.
                self.api
                    .delete_webhook()
                    .await
                    .map_err(|e| RuntimeError::api("deleteWebhook", e))?;
                let poller = LongPoller::new(
                    self.api.clone(),
                    self.config.transport.polling.to_poll_options(),
                );
                Inbound::Polling(poller.spawn(tx, self.intake.clone()))
            }
        };

        self.dispatcher.seal();

        let dispatch_loop = tokio::spawn(dispatch_loop(
            rx,
            self.dispatcher.clone(),
            self.bot(),
            self.config.dispatch.max_in_flight,
            self.intake.clone(),
            self.abandon.clone(),
        ));

        *self.running.lock().await = Some(Running {
            inbound,
            dispatch_loop,
        });

        info!(
            transport = %self.config.transport.mode,
            max_in_flight = self.config.dispatch.max_in_flight,
            "Bot service running"
        );
        Ok(())
    }

    /// Stops admitting events, gives queued and in-flight dispatches up to
    /// `grace` to finish, aborts the rest and tears the transport down.
    ///
    /// Stopping a stopped service is a no-op; stopping a service that never
    /// started moves it straight to [`BotState::Stopped`].
    pub async fn stop(&self, grace: Duration) -> RuntimeResult<()> {
        match self.state() {
            BotState::Stopped => return Ok(()),
            BotState::Created => {
                return self.transition("stop", BotState::Created, BotState::Stopped);
            }
            _ => self.transition("stop", BotState::Running, BotState::Stopping)?,
        }

        info!(grace = ?grace, "Stopping bot service");
        self.intake.cancel();

        if let Some(running) = self.running.lock().await.take() {
            let mut dispatch_loop = running.dispatch_loop;
            if tokio::time::timeout(grace, &mut dispatch_loop).await.is_err() {
                warn!("Grace period elapsed, aborting in-flight dispatches");
                self.abandon.cancel();
                if let Err(e) = dispatch_loop.await {
                    error!(error = %e, "Dispatch loop ended abnormally");
                }
            }

            match running.inbound {
                Inbound::Webhook(listener) => {
                    if let Err(e) = self.api.delete_webhook().await {
                        warn!(error = %e, "Failed to deregister webhook");
                    }
                    listener.shutdown().await;
                }
                Inbound::Polling(poller) => {
                    if let Err(e) = poller.await {
                        error!(error = %e, "Long poller ended abnormally");
                    }
                }
            }
        }

        // Nothing may outlive the service.
        self.abandon.cancel();
        self.transition("stop", BotState::Stopping, BotState::Stopped)?;
        info!("Bot service stopped");
        Ok(())
    }

    /// Starts the service, waits for Ctrl+C or SIGTERM, then stops it with
    /// the configured grace period.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Starts the service, waits for `shutdown`, then stops it.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop(self.config.dispatch.shutdown_grace()).await
    }
}

impl std::fmt::Debug for BotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotService")
            .field("state", &self.state())
            .field("transport", &self.config.transport.mode)
            .field("identity", &self.identity.get())
            .finish_non_exhaustive()
    }
}

async fn dispatch_loop(
    mut events: mpsc::Receiver<Event>,
    dispatcher: Arc<Dispatcher>,
    bot: BoxedBot,
    max_in_flight: usize,
    intake: CancellationToken,
    abandon: CancellationToken,
) {
    let mut tasks: JoinSet<DispatchOutcome> = JoinSet::new();
    let spawn = |tasks: &mut JoinSet<DispatchOutcome>, event: Event| {
        let dispatcher = dispatcher.clone();
        let bot = bot.clone();
        let cancel = abandon.child_token();
        tasks.spawn(async move { dispatcher.dispatch_with_cancellation(event, bot, cancel).await });
    };

    loop {
        tokio::select! {
            biased;
            _ = intake.cancelled() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_joined(joined),
            event = events.recv(), if tasks.len() < max_in_flight => match event {
                Some(event) => spawn(&mut tasks, event),
                None => break,
            },
        }
    }

    // Transports see the queue closed; events already accepted still run
    // within the grace period.
    events.close();
    debug!(
        queued = events.len(),
        in_flight = tasks.len(),
        "Draining queued and in-flight dispatches"
    );

    let mut drained = false;
    loop {
        if drained && tasks.is_empty() {
            break;
        }
        tokio::select! {
            biased;
            _ = abandon.cancelled() => {
                let mut dropped = 0usize;
                while events.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    warn!(dropped, "Discarded queued events on shutdown");
                }
                warn!(aborted = tasks.len(), "Aborting in-flight dispatches");
                tasks.shutdown().await;
                break;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_joined(joined),
            event = events.recv(), if !drained && tasks.len() < max_in_flight => match event {
                Some(event) => spawn(&mut tasks, event),
                None => drained = true,
            },
        }
    }
}

fn log_joined(joined: Result<DispatchOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => debug!(outcome = ?outcome, "Dispatch finished"),
        Err(e) if e.is_cancelled() => debug!("Dispatch aborted"),
        Err(e) => error!(error = %e, "Dispatch task failed"),
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
