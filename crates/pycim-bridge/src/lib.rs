//! pycim bridge
//!
//! Provider lifecycle and dispatch engine for Python CIM providers:
//!
//! - [`gate`]: serialized access to the single embedded execution context
//! - [`translator`]: runtime faults to structured CIM exceptions
//! - [`resolver`]: provider locations to source file paths
//! - [`loader`]: provider construction and shutdown
//! - [`cache`]: loaded providers keyed by path, reload on change, activation counts
//! - [`handlers`]: the handler-family seam and the pass-through families
//! - [`manager`]: request routing and the server-facing entry points
//!
//! With the `python` feature, [`python::PythonInterpreter`] embeds CPython
//! through pyo3.
//!
//! # Example
//!
//! ```rust,ignore
//! use pycim_bridge::{HandlerSet, ProviderManager};
//! use pycim_bridge::python::PythonInterpreter;
//! use pycim_kernel::BridgeConfig;
//!
//! let config = BridgeConfig::load_with_env("/etc/pycim/bridge.toml")?;
//! let manager = ProviderManager::new(
//!     config.clone(),
//!     PythonInterpreter::new(config),
//!     HandlerSet::passthrough(),
//! )?;
//! let response = manager.process_message(&request);
//! ```

pub mod cache;
pub mod gate;
pub mod handlers;
pub mod loader;
pub mod manager;
pub mod resolver;
pub mod translator;

#[cfg(feature = "python")]
pub mod python;

pub use cache::{CacheStats, ProviderCache, ProviderRef};
pub use gate::{CallError, ExecutionGate};
pub use handlers::{
    HandlerFamily, HandlerFamilyKind, HandlerSet, PassthroughHandlers, ProviderCall,
};
pub use loader::{LoadedProvider, ProviderLoader, modification_time};
pub use manager::{Activation, ProviderManager, Route, route};
pub use resolver::{NameResolver, get_py_file};
pub use translator::ExceptionTranslator;

// Re-export kernel vocabulary
pub use pycim_kernel;
