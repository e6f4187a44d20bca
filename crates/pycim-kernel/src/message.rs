//! Request and response envelopes exchanged with the server core.
//!
//! The bridge only reads the request kind and operation context; the payload
//! belongs to the transport and marshaling layers and is kept as opaque JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::context::OperationContext;
use crate::status::CimException;

// ============================================================================
// Request kinds
// ============================================================================

/// Discriminator of an inbound provider request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    GetInstance,
    EnumerateInstances,
    EnumerateInstanceNames,
    CreateInstance,
    ModifyInstance,
    DeleteInstance,
    GetProperty,
    SetProperty,
    InvokeMethod,
    Associators,
    AssociatorNames,
    References,
    ReferenceNames,
    ExecQuery,
    CreateSubscription,
    ModifySubscription,
    DeleteSubscription,
    ExportIndication,
    DisableModule,
    EnableModule,
    StopAllProviders,
    InitializeProvider,
    SubscriptionInitComplete,
    /// A kind the transport could not map onto a known request
    Unrecognized(UnknownKind),
}

/// Wire name that matches no known request kind.
///
/// Only built by parsing, so it never shadows a named kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownKind(String);

impl UnknownKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RequestKind {
    /// Every named request kind, in wire order.
    pub const ALL: [RequestKind; 23] = [
        RequestKind::GetInstance,
        RequestKind::EnumerateInstances,
        RequestKind::EnumerateInstanceNames,
        RequestKind::CreateInstance,
        RequestKind::ModifyInstance,
        RequestKind::DeleteInstance,
        RequestKind::GetProperty,
        RequestKind::SetProperty,
        RequestKind::InvokeMethod,
        RequestKind::Associators,
        RequestKind::AssociatorNames,
        RequestKind::References,
        RequestKind::ReferenceNames,
        RequestKind::ExecQuery,
        RequestKind::CreateSubscription,
        RequestKind::ModifySubscription,
        RequestKind::DeleteSubscription,
        RequestKind::ExportIndication,
        RequestKind::DisableModule,
        RequestKind::EnableModule,
        RequestKind::StopAllProviders,
        RequestKind::InitializeProvider,
        RequestKind::SubscriptionInitComplete,
    ];

    /// Kebab-case wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::GetInstance => "get-instance",
            RequestKind::EnumerateInstances => "enumerate-instances",
            RequestKind::EnumerateInstanceNames => "enumerate-instance-names",
            RequestKind::CreateInstance => "create-instance",
            RequestKind::ModifyInstance => "modify-instance",
            RequestKind::DeleteInstance => "delete-instance",
            RequestKind::GetProperty => "get-property",
            RequestKind::SetProperty => "set-property",
            RequestKind::InvokeMethod => "invoke-method",
            RequestKind::Associators => "associators",
            RequestKind::AssociatorNames => "associator-names",
            RequestKind::References => "references",
            RequestKind::ReferenceNames => "reference-names",
            RequestKind::ExecQuery => "exec-query",
            RequestKind::CreateSubscription => "create-subscription",
            RequestKind::ModifySubscription => "modify-subscription",
            RequestKind::DeleteSubscription => "delete-subscription",
            RequestKind::ExportIndication => "export-indication",
            RequestKind::DisableModule => "disable-module",
            RequestKind::EnableModule => "enable-module",
            RequestKind::StopAllProviders => "stop-all-providers",
            RequestKind::InitializeProvider => "initialize-provider",
            RequestKind::SubscriptionInitComplete => "subscription-init-complete",
            RequestKind::Unrecognized(name) => name.as_str(),
        }
    }

}

impl From<String> for RequestKind {
    fn from(name: String) -> Self {
        RequestKind::ALL
            .iter()
            .find(|kind| kind.as_str() == name)
            .cloned()
            .unwrap_or(RequestKind::Unrecognized(UnknownKind(name)))
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for RequestKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RequestKind::from(s.to_string()))
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Typed request handed to the provider manager by the server core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CimRequest {
    /// Correlation id copied into the response
    pub message_id: String,
    /// Request discriminator
    pub kind: RequestKind,
    /// Operation context with provider identity metadata
    pub context: OperationContext,
    /// Operation arguments, opaque to the bridge
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CimRequest {
    pub fn new(
        message_id: impl Into<String>,
        kind: RequestKind,
        context: OperationContext,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            kind,
            context,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Build an empty, successful response bound to this request.
    pub fn build_response(&self) -> CimResponse {
        CimResponse {
            message_id: self.message_id.clone(),
            kind: self.kind.clone(),
            payload: serde_json::Value::Null,
            exception: None,
        }
    }
}

/// Response returned to the server core; exactly one per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CimResponse {
    pub message_id: String,
    pub kind: RequestKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Set when the operation failed
    pub exception: Option<CimException>,
}

impl CimResponse {
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_exception(mut self, exception: CimException) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn is_success(&self) -> bool {
        self.exception.is_none()
    }
}
