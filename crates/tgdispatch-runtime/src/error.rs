//! Runtime error types.

use thiserror::Error;

use tgdispatch_core::ApiError;
use tgdispatch_transport::TransportError;

use crate::config::ConfigError;
use crate::service::BotState;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport could not be set up.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A platform call made while starting or stopping failed.
    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    /// The operation is not allowed in the current lifecycle state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: BotState,
    },
}

impl RuntimeError {
    pub(crate) fn api(operation: &'static str, source: ApiError) -> Self {
        Self::Api { operation, source }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
