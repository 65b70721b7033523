//! Unified error types for the tgdispatch core.
//!
//! Errors are split by the boundary they cross:
//!
//! - [`ApiError`]: outbound calls to the platform (send, answer, poll).
//! - [`BindError`]: decoding an opaque callback payload.
//! - [`HandlerError`]: anything raised by a middleware or handler. These never
//!   leave [`Dispatcher::dispatch`](crate::Dispatcher::dispatch).
//! - [`DispatchError`]: misuse of the dispatcher registration API.
//! - [`AcquireError`]: a rate-limiter wait that did not end with a token.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// API Errors
// =============================================================================

/// Errors returned by outbound platform calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Network or connectivity failure talking to the platform.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform throttled the request and advertised a retry delay.
    #[error("too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Delay advertised by the platform.
        retry_after: Duration,
    },

    /// The platform understood the request and refused it.
    #[error("request rejected ({code}): {description}")]
    Rejected {
        /// Platform error code (HTTP-like).
        code: i64,
        /// Human readable description from the platform.
        description: String,
    },

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// No rate-limiter token became available within the allowed wait.
    #[error("rate limiter wait exceeded {0:?}")]
    RateLimiterTimeout(Duration),

    /// The operation was aborted by a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Returns `true` for errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns the advertised retry delay for throttling responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooManyRequests { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

// =============================================================================
// Bind Errors
// =============================================================================

/// Errors raised while binding callback query data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    /// The wrapped event is not a callback query.
    #[error("event is not a callback query")]
    NotCallbackQuery,

    /// The callback query carries no payload.
    #[error("callback payload is empty")]
    EmptyPayload,

    /// The payload does not fit the destination shape.
    #[error("invalid callback payload: {0}")]
    Invalid(String),

    /// The encoded callback data exceeds the platform limit.
    #[error("callback data is {len} bytes, limit is {limit}")]
    TooLong {
        /// Encoded length in bytes.
        len: usize,
        /// Platform limit in bytes.
        limit: usize,
    },
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Any failure raised inside a middleware or handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Callback binding failed.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// An outbound call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A collaborator (storage, lookup) failed.
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// The handler panicked; the panic was caught at the dispatch boundary.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Any other error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Creates a collaborator error.
    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }

    /// Wraps an arbitrary error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(err))
    }
}

// =============================================================================
// Dispatch / Acquire Errors
// =============================================================================

/// Errors from the dispatcher registration API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The middleware chain is closed once the service is running.
    #[error("dispatcher is sealed, registration is closed")]
    Sealed,
}

/// Errors from [`RateLimiter::acquire`](crate::RateLimiter::acquire).
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The wait was aborted by the caller's cancellation token.
    #[error("rate limiter wait cancelled")]
    Cancelled,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for outbound platform calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for middleware and handlers.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Result type for callback binding.
pub type BindResult<T> = Result<T, BindError>;
