//! Handler families
//!
//! A handler family turns a routed request into calls on the provider object
//! and builds the response. The dispatch engine owns one family per
//! [`HandlerFamilyKind`] in a [`HandlerSet`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use pycim_kernel::{
    CimException, CimRequest, CimResponse, CimStatusCode, Interpreter, OperationContext,
    ProviderEnvironment, RequestKind, RuntimeFault,
};

use crate::cache::ProviderRef;
use crate::gate::{CallError, ExecutionGate};
use crate::translator::ExceptionTranslator;

/// The operation families requests are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerFamilyKind {
    Instance,
    Method,
    Associator,
    Indication,
    IndicationConsumer,
}

impl fmt::Display for HandlerFamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandlerFamilyKind::Instance => "instance",
            HandlerFamilyKind::Method => "method",
            HandlerFamilyKind::Associator => "associator",
            HandlerFamilyKind::Indication => "indication",
            HandlerFamilyKind::IndicationConsumer => "indication-consumer",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Provider call
// ============================================================================

/// Access to one provider for the duration of one request.
pub struct ProviderCall<'a, I: Interpreter> {
    gate: &'a ExecutionGate<I>,
    translator: &'a ExceptionTranslator,
    provider: &'a ProviderRef<I::Provider>,
    environment: ProviderEnvironment,
}

impl<'a, I: Interpreter> ProviderCall<'a, I> {
    pub fn new(
        gate: &'a ExecutionGate<I>,
        translator: &'a ExceptionTranslator,
        provider: &'a ProviderRef<I::Provider>,
        ctx: &OperationContext,
    ) -> Self {
        Self {
            gate,
            translator,
            provider,
            environment: ProviderEnvironment::from_context(ctx),
        }
    }

    pub fn provider(&self) -> &ProviderRef<I::Provider> {
        self.provider
    }

    /// Environment binding built for this request.
    pub fn environment(&self) -> &ProviderEnvironment {
        &self.environment
    }

    /// Run `f` against the provider under the gate.
    ///
    /// Faults are translated, with the caller's location as provenance.
    #[track_caller]
    pub fn call<R>(
        &self,
        f: impl FnOnce(&mut I, &I::Provider, &ProviderEnvironment) -> Result<R, RuntimeFault>,
    ) -> Result<R, CimException> {
        let handle: &I::Provider = self.provider.handle();
        let result = self
            .gate
            .invoke(|runtime| f(runtime, handle, &self.environment));
        match result {
            Ok(value) => Ok(value),
            Err(CallError::Fault(fault)) => {
                Err(self.translator.translate(&fault, self.provider.load_path()))
            }
            Err(CallError::Gate(e)) => {
                Err(CimException::located(CimStatusCode::FAILED, e.to_string()))
            }
        }
    }

    /// Invoke the provider entry point `name` with `payload`.
    #[track_caller]
    pub fn invoke_function(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, CimException> {
        self.call(|runtime, provider, env| runtime.invoke(provider, name, env, payload))
    }
}

// ============================================================================
// Handler families
// ============================================================================

/// One family of provider operations.
pub trait HandlerFamily<I: Interpreter>: Send + Sync {
    /// Serve `request` against the provider behind `call`. Always returns a
    /// response bound to the request.
    fn handle(&self, request: &CimRequest, call: &ProviderCall<'_, I>) -> CimResponse;
}

/// The five handler families used by the dispatch engine.
pub struct HandlerSet<I: Interpreter> {
    instance: Box<dyn HandlerFamily<I>>,
    method: Box<dyn HandlerFamily<I>>,
    associator: Box<dyn HandlerFamily<I>>,
    indication: Box<dyn HandlerFamily<I>>,
    indication_consumer: Box<dyn HandlerFamily<I>>,
}

impl<I: Interpreter> HandlerSet<I> {
    /// Every family forwards to the provider entry point of the same name.
    pub fn passthrough() -> Self {
        Self {
            instance: Box::new(PassthroughHandlers),
            method: Box::new(PassthroughHandlers),
            associator: Box::new(PassthroughHandlers),
            indication: Box::new(PassthroughHandlers),
            indication_consumer: Box::new(PassthroughHandlers),
        }
    }

    pub fn with_family(
        mut self,
        kind: HandlerFamilyKind,
        handler: impl HandlerFamily<I> + 'static,
    ) -> Self {
        let handler: Box<dyn HandlerFamily<I>> = Box::new(handler);
        match kind {
            HandlerFamilyKind::Instance => self.instance = handler,
            HandlerFamilyKind::Method => self.method = handler,
            HandlerFamilyKind::Associator => self.associator = handler,
            HandlerFamilyKind::Indication => self.indication = handler,
            HandlerFamilyKind::IndicationConsumer => self.indication_consumer = handler,
        }
        self
    }

    pub fn family(&self, kind: HandlerFamilyKind) -> &dyn HandlerFamily<I> {
        match kind {
            HandlerFamilyKind::Instance => self.instance.as_ref(),
            HandlerFamilyKind::Method => self.method.as_ref(),
            HandlerFamilyKind::Associator => self.associator.as_ref(),
            HandlerFamilyKind::Indication => self.indication.as_ref(),
            HandlerFamilyKind::IndicationConsumer => self.indication_consumer.as_ref(),
        }
    }
}

impl<I: Interpreter> Default for HandlerSet<I> {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// Forwards the request payload to the provider entry point named for the
/// request kind and returns the provider's result as the response payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughHandlers;

impl PassthroughHandlers {
    /// Provider entry point (without prefix) serving `kind`.
    pub fn function_name(kind: &RequestKind) -> Option<&'static str> {
        let name = match kind {
            RequestKind::GetInstance => "getInstance",
            RequestKind::EnumerateInstances => "enumInstances",
            RequestKind::EnumerateInstanceNames => "enumInstanceNames",
            RequestKind::CreateInstance => "createInstance",
            RequestKind::ModifyInstance => "modifyInstance",
            RequestKind::DeleteInstance => "deleteInstance",
            RequestKind::GetProperty => "getProperty",
            RequestKind::SetProperty => "setProperty",
            RequestKind::InvokeMethod => "invokeMethod",
            RequestKind::Associators => "associators",
            RequestKind::AssociatorNames => "associatorNames",
            RequestKind::References => "references",
            RequestKind::ReferenceNames => "referenceNames",
            RequestKind::CreateSubscription => "activateFilter",
            RequestKind::DeleteSubscription => "deActivateFilter",
            RequestKind::ExportIndication => "consumeIndication",
            _ => return None,
        };
        Some(name)
    }
}

impl<I: Interpreter> HandlerFamily<I> for PassthroughHandlers {
    fn handle(&self, request: &CimRequest, call: &ProviderCall<'_, I>) -> CimResponse {
        let response = request.build_response();
        let Some(function) = Self::function_name(&request.kind) else {
            return response.with_exception(CimException::not_supported(format!(
                "no provider entry point for {}",
                request.kind
            )));
        };

        debug!(
            "Forwarding {} to {} of {}",
            request.kind,
            function,
            call.provider().load_path().display()
        );
        match call.invoke_function(function, &request.payload) {
            Ok(payload) => response.with_payload(payload),
            Err(exception) => response.with_exception(exception),
        }
    }
}
