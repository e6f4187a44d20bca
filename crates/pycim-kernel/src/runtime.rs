//! Embedded runtime abstraction.
//!
//! Providers live inside a single embedded execution context that can run one
//! task at a time. [`Interpreter`] is the seam through which the bridge talks
//! to that context; failures raised inside it are captured as [`RuntimeFault`]
//! values before they leave the call, so no foreign unwinding escapes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::context::ProviderEnvironment;

// ============================================================================
// Fault model
// ============================================================================

/// Handle to the object model's management-error type.
///
/// Obtained once when the runtime is initialized and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTypeHandle {
    qualified_name: String,
}

impl ErrorTypeHandle {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }
}

/// One argument of a raised failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultValue {
    Int(i64),
    Str(String),
    /// Any other value, kept as its printable representation
    Other(String),
}

impl fmt::Display for FaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultValue::Int(value) => write!(f, "{}", value),
            FaultValue::Str(value) => write!(f, "{:?}", value),
            FaultValue::Other(repr) => f.write_str(repr),
        }
    }
}

/// Arguments of a raised failure, as far as they could be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultArgs {
    Extracted(Vec<FaultValue>),
    /// Reading the arguments failed; carries the secondary failure
    Malformed(String),
}

/// A failure raised inside the embedded runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFault {
    /// Qualified name of the raised type
    pub type_name: String,
    /// Qualified names of the raised type and its bases, most derived first
    pub lineage: Vec<String>,
    pub args: FaultArgs,
    /// Diagnostic trace captured at the raise site (may be empty)
    pub trace: String,
}

impl RuntimeFault {
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            lineage: vec![type_name.clone()],
            type_name,
            args: FaultArgs::Extracted(Vec::new()),
            trace: String::new(),
        }
    }

    /// Add a base type to the lineage.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.lineage.push(base.into());
        self
    }

    pub fn with_args(mut self, args: Vec<FaultValue>) -> Self {
        self.args = FaultArgs::Extracted(args);
        self
    }

    pub fn with_malformed_args(mut self, reason: impl Into<String>) -> Self {
        self.args = FaultArgs::Malformed(reason.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// A failure that did not originate from provider code (e.g. a panic in
    /// the runtime glue).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("RuntimeError").with_args(vec![FaultValue::Str(message.into())])
    }

    /// A provider object lacks the requested entry point.
    pub fn missing_function(name: &str) -> Self {
        Self::new("AttributeError")
            .with_args(vec![FaultValue::Str(format!("no such method: {}", name))])
    }

    /// Whether the raised type is, or derives from, the given type.
    pub fn is_instance_of(&self, error_type: &ErrorTypeHandle) -> bool {
        self.lineage
            .iter()
            .any(|name| name == error_type.qualified_name())
    }

    /// Printable description of the arguments.
    pub fn description(&self) -> String {
        match &self.args {
            FaultArgs::Extracted(args) => args
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            FaultArgs::Malformed(reason) => format!("<unreadable arguments: {}>", reason),
        }
    }
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name, self.description())
    }
}

impl std::error::Error for RuntimeFault {}

// ============================================================================
// Interpreter seam
// ============================================================================

/// The single embedded execution context shared by every provider.
///
/// Implementations are never called concurrently: every call is made while
/// the bridge's execution gate holds exclusive access.
pub trait Interpreter: Send + 'static {
    /// Opaque handle to a provider object living inside the runtime.
    type Provider: Send + Sync + 'static;

    /// Start the runtime and return the management-error type handle.
    fn initialize(&mut self) -> Result<ErrorTypeHandle, RuntimeFault>;

    /// Restore the home execution state and tear the runtime down.
    fn finalize(&mut self);

    /// Construct a provider from the unit at `load_path`.
    fn construct_provider(
        &mut self,
        env: &ProviderEnvironment,
        load_path: &Path,
    ) -> Result<Self::Provider, RuntimeFault>;

    /// Invoke the provider's shutdown entry point.
    fn shutdown_provider(
        &mut self,
        provider: &Self::Provider,
        env: &ProviderEnvironment,
    ) -> Result<(), RuntimeFault>;

    /// Invoke a named provider entry point with an opaque payload.
    fn invoke(
        &mut self,
        provider: &Self::Provider,
        function: &str,
        env: &ProviderEnvironment,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RuntimeFault>;

    /// Whether the provider may be replaced when its file changes.
    fn can_unload(&mut self, provider: &Self::Provider) -> bool {
        let _ = provider;
        true
    }
}
