//! pycim kernel
//!
//! Shared vocabulary of the provider bridge:
//! - request/response envelopes and the closed set of request kinds
//! - CIM status codes and structured exceptions
//! - operation context and provider identity metadata
//! - the [`runtime::Interpreter`] seam and its fault model
//! - typed errors and configuration loading

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod runtime;
pub mod status;

pub use config::{BridgeConfig, ConfigError};
pub use context::{
    OperationContext, ProviderEnvironment, ProviderIdContainer, ProviderIdentity, SubscriptionId,
};
pub use error::{BridgeError, BridgeResult, GateError};
pub use message::{CimRequest, CimResponse, RequestKind, UnknownKind};
pub use runtime::{ErrorTypeHandle, FaultArgs, FaultValue, Interpreter, RuntimeFault};
pub use status::{CimException, CimStatusCode};
