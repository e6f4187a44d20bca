//! Crate-level error types shared by the bridge.

use thiserror::Error;

use crate::config::ConfigError;
use crate::runtime::RuntimeFault;
use crate::status::{CimException, CimStatusCode};

/// Errors raised by the execution context gate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateError {
    /// The runtime has not been started yet.
    #[error("execution context not initialized")]
    NotInitialized,

    /// `initialize` was called a second time.
    #[error("execution context already initialized")]
    AlreadyInitialized,

    /// The runtime has been torn down.
    #[error("execution context has been shut down")]
    Closed,

    /// The runtime failed to start.
    #[error("execution context failed to start: {0}")]
    Startup(RuntimeFault),
}

/// Errors surfaced by the provider bridge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// Resolving or loading the provider failed.
    #[error("no such provider: {0}")]
    NoSuchProvider(String),

    /// A structured exception produced by provider code or by routing.
    #[error(transparent)]
    Cim(#[from] CimException),

    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias using [`BridgeError`].
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<BridgeError> for CimException {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NoSuchProvider(msg) => {
                CimException::not_found(format!("no such provider: {}", msg))
            }
            BridgeError::Cim(exc) => exc,
            other => {
                tracing::debug!(error = %other, "bridge error reported as CIM_ERR_FAILED");
                CimException::failed(other.to_string())
            }
        }
    }
}
