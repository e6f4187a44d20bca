//! Provider manager
//!
//! Entry point used by the server core. Every request goes through the same
//! pipeline:
//!
//! 1. resolve the provider identity to a load path
//! 2. fetch (or load, or reload) the cached provider
//! 3. route by request kind
//! 4. hand the request to the routed handler family
//!
//! Exactly one response is produced per request. Failures are carried in the
//! response as a [`CimException`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info};

use pycim_kernel::{
    BridgeConfig, BridgeResult, CimException, CimRequest, CimResponse, CimStatusCode,
    Interpreter, RequestKind,
};

use crate::cache::{CacheStats, ProviderCache};
use crate::gate::ExecutionGate;
use crate::handlers::{HandlerFamilyKind, HandlerSet, ProviderCall};
use crate::loader::ProviderLoader;
use crate::resolver::NameResolver;
use crate::translator::ExceptionTranslator;

// ============================================================================
// Routing
// ============================================================================

/// Activation-count change applied before a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Unchanged,
    Increment,
    Decrement,
}

/// Where a request kind is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Served by a handler family
    Family(HandlerFamilyKind, Activation),
    /// Known kind without an implementation
    NotYetImplemented(&'static str),
    /// Anything the bridge does not serve
    Unsupported,
}

/// Routing table.
pub fn route(kind: &RequestKind) -> Route {
    use Activation::*;
    use HandlerFamilyKind::*;

    match kind {
        RequestKind::GetInstance
        | RequestKind::EnumerateInstances
        | RequestKind::EnumerateInstanceNames
        | RequestKind::CreateInstance
        | RequestKind::ModifyInstance
        | RequestKind::DeleteInstance
        | RequestKind::GetProperty
        | RequestKind::SetProperty => Route::Family(Instance, Unchanged),
        RequestKind::InvokeMethod => Route::Family(Method, Unchanged),
        RequestKind::Associators
        | RequestKind::AssociatorNames
        | RequestKind::References
        | RequestKind::ReferenceNames => Route::Family(Associator, Unchanged),
        RequestKind::CreateSubscription => Route::Family(Indication, Increment),
        RequestKind::DeleteSubscription => Route::Family(Indication, Decrement),
        RequestKind::ExportIndication => Route::Family(IndicationConsumer, Unchanged),
        RequestKind::ExecQuery => Route::NotYetImplemented("ExecQuery not yet implemented"),
        RequestKind::ModifySubscription => {
            Route::NotYetImplemented("ModifySubscription not yet implemented")
        }
        RequestKind::DisableModule => {
            Route::NotYetImplemented("DisableModuleRequest not yet implemented")
        }
        RequestKind::EnableModule => {
            Route::NotYetImplemented("EnableModuleRequest not yet implemented")
        }
        RequestKind::StopAllProviders => {
            Route::NotYetImplemented("StopAllProviders not yet implemented")
        }
        RequestKind::SubscriptionInitComplete => {
            Route::NotYetImplemented("SubscriptionInitComplete not yet implemented")
        }
        RequestKind::InitializeProvider | RequestKind::Unrecognized(_) => Route::Unsupported,
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Loads providers on demand and dispatches requests to them.
pub struct ProviderManager<I: Interpreter> {
    config: BridgeConfig,
    gate: Arc<ExecutionGate<I>>,
    translator: Arc<ExceptionTranslator>,
    resolver: NameResolver,
    cache: ProviderCache<I>,
    handlers: HandlerSet<I>,
}

impl<I: Interpreter> ProviderManager<I> {
    /// Start the execution context and build the dispatch pipeline.
    pub fn new(
        config: BridgeConfig,
        interpreter: I,
        handlers: HandlerSet<I>,
    ) -> BridgeResult<Self> {
        let gate = Arc::new(ExecutionGate::new(interpreter));
        let error_type = gate.initialize()?;
        let translator = Arc::new(ExceptionTranslator::new(error_type));
        let loader = ProviderLoader::new(Arc::clone(&gate), Arc::clone(&translator));
        let cache = ProviderCache::new(loader).with_clamp_activation(config.clamp_activation);
        let resolver = NameResolver::new(&config.provider_dir);

        info!(
            "Provider manager started (provider dir: {})",
            config.provider_dir.display()
        );
        Ok(Self {
            config,
            gate,
            translator,
            resolver,
            cache,
            handlers,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn cache(&self) -> &ProviderCache<I> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Serve one request.
    pub fn process_message(&self, request: &CimRequest) -> CimResponse {
        debug!(
            "Processing {} ({}) for {}/{}",
            request.kind,
            request.message_id,
            request.context.provider_id.module_name,
            request.context.provider_id.provider_name
        );

        let identity = match self.resolver.resolve(&request.context.provider_id) {
            Ok(identity) => identity,
            Err(e) => return request.build_response().with_exception(e.into()),
        };

        let mut provider = match self.cache.resolve(&identity.load_path, &request.context) {
            Ok(provider) => provider,
            Err(e) => {
                error!(
                    "Cannot serve {} from {}: {}",
                    request.kind,
                    identity.load_path.display(),
                    e
                );
                return request.build_response().with_exception(e.into());
            }
        };

        match route(&request.kind) {
            Route::Family(family, activation) => {
                match activation {
                    Activation::Increment => self.cache.increment_activation(&mut provider),
                    Activation::Decrement => self.cache.decrement_activation(&mut provider),
                    Activation::Unchanged => {}
                }
                let call =
                    ProviderCall::new(&self.gate, &self.translator, &provider, &request.context);
                let handler = self.handlers.family(family);
                panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request, &call)))
                    .unwrap_or_else(|_| {
                        error!("The {} handler panicked serving {}", family, request.kind);
                        request.build_response().with_exception(CimException::located(
                            CimStatusCode::FAILED,
                            format!("{} handler failed", family),
                        ))
                    })
            }
            Route::NotYetImplemented(message) => request
                .build_response()
                .with_exception(CimException::located(CimStatusCode::NOT_SUPPORTED, message)),
            Route::Unsupported => {
                debug!("Unsupported request kind {}", request.kind);
                request
                    .build_response()
                    .with_exception(CimException::located(CimStatusCode::NOT_SUPPORTED, ""))
            }
        }
    }

    /// Whether any cached provider still has a live subscription.
    pub fn has_active_providers(&self) -> bool {
        self.cache.has_active_providers()
    }

    /// Unload providers that have been idle longer than the configured
    /// timeout. Does nothing without a timeout.
    pub fn unload_idle_providers(&self) -> usize {
        match self.config.idle_timeout() {
            Some(timeout) => self.cache.unload_idle(SystemTime::now(), timeout),
            None => 0,
        }
    }

    /// Shut every provider down, then the execution context. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        if !self.gate.is_running() {
            return;
        }
        let drained = self.cache.drain();
        info!("Provider manager shutting down ({} providers unloaded)", drained);
        self.gate.shutdown();
    }
}

impl<I: Interpreter> Drop for ProviderManager<I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
