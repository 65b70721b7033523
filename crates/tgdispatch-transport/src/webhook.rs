//! axum webhook receiver.
//!
//! Each POST carries one JSON-encoded update. Decoded events are pushed into
//! a bounded channel; the request is answered only once the event is queued,
//! so a full queue slows the platform down instead of dropping events.
//!
//! ```text
//! Telegram ──POST /telegram/webhook──▶ receive_update ──mpsc──▶ dispatch loop
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use tgdispatch_core::Event;

use crate::error::{TransportError, TransportResult};
use crate::model::Update;

/// Header carrying the secret registered with `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

struct ReceiverState {
    secret: Option<String>,
    events: mpsc::Sender<Event>,
}

/// Builds the webhook router.
///
/// When `secret` is set, requests without a matching
/// `X-Telegram-Bot-Api-Secret-Token` header are answered with `401`.
pub fn router(path: &str, secret: Option<String>, events: mpsc::Sender<Event>) -> Router {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    Router::new()
        .route(&path, post(receive_update))
        .with_state(Arc::new(ReceiverState { secret, events }))
}

async fn receive_update(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.secret {
        let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_str()) {
            warn!("Webhook request with missing or wrong secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            debug!(error = %e, len = body.len(), "Undecodable webhook body");
            return StatusCode::BAD_REQUEST;
        }
    };

    let update_id = update.update_id;
    let Some(event) = update.into_event() else {
        trace!(update_id, "Ignoring unsupported update type");
        return StatusCode::OK;
    };

    match state.events.send(event).await {
        Ok(()) => {
            trace!(update_id, "Queued webhook update");
            StatusCode::OK
        }
        // Intake closed; the platform redelivers later.
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Handle to a running webhook listener.
///
/// Dropping the handle signals shutdown without waiting for it.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Binds `addr` and serves the webhook route on it.
pub async fn serve(
    addr: &str,
    path: &str,
    secret: Option<String>,
    events: mpsc::Sender<Event>,
) -> TransportResult<ListenerHandle> {
    let router = router(path, secret, events);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, path = %path, "Webhook server listening");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
        match result {
            Ok(()) => info!(addr = %local_addr, "Webhook server stopped"),
            Err(e) => error!(error = %e, "Webhook server error"),
        }
    });

    Ok(ListenerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const UPDATE: &str = r#"{"update_id":3,"message":{"message_id":1,"date":1,
        "chat":{"id":9,"type":"private"},"text":"hello"}}"#;

    fn post(body: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/hook").header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_update_is_queued() {
        let (tx, mut rx) = mpsc::channel(4);
        let app = router("hook", None, tx);

        let response = app.oneshot(post(UPDATE, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.update_id(), 3);
        assert_eq!(event.text(), "hello");
    }

    #[tokio::test]
    async fn test_secret_is_enforced() {
        let (tx, mut rx) = mpsc::channel(4);
        let app = router("/hook", Some("s3cret".into()), tx);

        let denied = app.clone().oneshot(post(UPDATE, Some("wrong"))).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        let missing = app.clone().oneshot(post(UPDATE, None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());

        let accepted = app.oneshot(post(UPDATE, Some("s3cret"))).await.unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let response = router("/hook", None, tx)
            .oneshot(post("{not json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_closed_intake_asks_for_redelivery() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let response = router("/hook", None, tx)
            .oneshot(post(UPDATE, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_serve_binds_and_shuts_down() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = serve("127.0.0.1:0", "/hook", None, tx).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.shutdown().await;
    }
}
