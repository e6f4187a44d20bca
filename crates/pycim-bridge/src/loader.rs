//! Provider loading and shutdown
//!
//! Constructs provider objects inside the execution context and shuts them
//! down again. Loading failures are reported as `NoSuchProvider`; shutdown
//! failures are logged and swallowed.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use pycim_kernel::{BridgeError, BridgeResult, Interpreter, OperationContext, ProviderEnvironment};

use crate::gate::{CallError, ExecutionGate};
use crate::translator::ExceptionTranslator;

/// Result of a successful load.
pub struct LoadedProvider<P> {
    /// Shared handle to the provider object inside the execution context
    pub handle: Arc<P>,
    /// On-disk modification time at load
    pub mod_time: SystemTime,
    /// Whether the provider may be replaced when its file changes
    pub can_unload: bool,
}

impl<P> std::fmt::Debug for LoadedProvider<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProvider")
            .field("mod_time", &self.mod_time)
            .field("can_unload", &self.can_unload)
            .finish_non_exhaustive()
    }
}

/// Modification time of `path`, or the UNIX epoch when it cannot be read.
pub fn modification_time(path: &Path) -> SystemTime {
    match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(time) => time,
        Err(e) => {
            debug!("Cannot stat {}: {}", path.display(), e);
            UNIX_EPOCH
        }
    }
}

/// Loads and shuts down providers through the execution gate.
pub struct ProviderLoader<I: Interpreter> {
    gate: Arc<ExecutionGate<I>>,
    translator: Arc<ExceptionTranslator>,
}

impl<I: Interpreter> ProviderLoader<I> {
    pub fn new(gate: Arc<ExecutionGate<I>>, translator: Arc<ExceptionTranslator>) -> Self {
        Self { gate, translator }
    }

    pub fn gate(&self) -> &Arc<ExecutionGate<I>> {
        &self.gate
    }

    /// Construct the provider at `load_path`.
    pub fn load(
        &self,
        load_path: &Path,
        ctx: &OperationContext,
    ) -> BridgeResult<LoadedProvider<I::Provider>> {
        let env = ProviderEnvironment::from_context(ctx);
        debug!(
            "Loading provider {} for {}/{}",
            load_path.display(),
            env.module_name,
            env.provider_name
        );

        let constructed = self.gate.invoke(|runtime| {
            let provider = runtime.construct_provider(&env, load_path)?;
            let can_unload = runtime.can_unload(&provider);
            Ok((provider, can_unload))
        });

        match constructed {
            Ok((provider, can_unload)) => {
                let mod_time = modification_time(load_path);
                info!(
                    "Loaded provider {} (can_unload: {})",
                    load_path.display(),
                    can_unload
                );
                Ok(LoadedProvider {
                    handle: Arc::new(provider),
                    mod_time,
                    can_unload,
                })
            }
            Err(CallError::Fault(fault)) => {
                error!("Caught exception loading provider {}", load_path.display());
                let exception = self.translator.translate(&fault, load_path);
                Err(BridgeError::NoSuchProvider(format!(
                    "load error: {}",
                    exception.message
                )))
            }
            Err(CallError::Gate(e)) => {
                error!("Cannot load provider {}: {}", load_path.display(), e);
                Err(BridgeError::NoSuchProvider(format!("load error: {}", e)))
            }
        }
    }

    /// Call the provider's shutdown entry point. Never fails.
    pub fn shutdown(&self, load_path: &Path, provider: &I::Provider, ctx: &OperationContext) {
        let env = ProviderEnvironment::from_context(ctx);
        debug!("Shutting down provider {}", load_path.display());

        match self
            .gate
            .invoke(|runtime| runtime.shutdown_provider(provider, &env))
        {
            Ok(()) => info!("Provider {} shut down", load_path.display()),
            Err(CallError::Fault(fault)) => {
                let exception = self.translator.translate(&fault, load_path);
                warn!(
                    "Ignoring shutdown failure of provider {}: {}",
                    load_path.display(),
                    exception
                );
            }
            Err(CallError::Gate(e)) => {
                warn!(
                    "Ignoring shutdown of provider {}: {}",
                    load_path.display(),
                    e
                );
            }
        }
    }
}
