use pyo3::exceptions::PyAttributeError;
use pyo3::prelude::*;
use pyo3::types::{PyModule, PyType};
use std::path::Path;
use tracing::{debug, info};

use pycim_kernel::{BridgeConfig, ErrorTypeHandle, Interpreter, ProviderEnvironment, RuntimeFault};

use super::convert::{
    environment_to_py, fault_from_pyerr, json_to_py, py_to_json, qualified_type_name,
};

/// Handles resolved once at startup.
struct Binding {
    factory: Py<PyAny>,
}

/// Embedded CPython runtime.
///
/// Providers are constructed by the binding module's provider factory and
/// called through `<function_prefix><name>` entry points.
pub struct PythonInterpreter {
    config: BridgeConfig,
    binding: Option<Binding>,
}

impl PythonInterpreter {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            binding: None,
        }
    }

    fn entry_point(&self, name: &str) -> String {
        format!("{}{}", self.config.function_prefix, name)
    }

    fn factory<'py>(&self, py: Python<'py>) -> Result<Bound<'py, PyAny>, RuntimeFault> {
        self.binding
            .as_ref()
            .map(|binding| binding.factory.bind(py).clone())
            .ok_or_else(|| RuntimeFault::internal("python runtime not initialized"))
    }
}

/// Resolve `binding.dotted.path`, importing the submodule part first.
fn resolve_in_binding<'py>(
    py: Python<'py>,
    binding: &Bound<'py, PyModule>,
    dotted: &str,
) -> PyResult<Bound<'py, PyAny>> {
    match dotted.rsplit_once('.') {
        Some((module, attr)) => {
            let qualified = format!("{}.{}", binding.name()?, module);
            py.import(qualified.as_str())?.getattr(attr)
        }
        None => binding.getattr(dotted),
    }
}

/// Look up a provider entry point. A missing attribute is reported as a
/// missing function rather than a raised exception.
fn entry_point_fn<'py>(
    py: Python<'py>,
    provider: &Py<PyAny>,
    name: &str,
) -> Result<Bound<'py, PyAny>, RuntimeFault> {
    match provider.bind(py).getattr(name) {
        Ok(function) => Ok(function),
        Err(err) if err.is_instance_of::<PyAttributeError>(py) => {
            Err(RuntimeFault::missing_function(name))
        }
        Err(err) => Err(fault_from_pyerr(py, &err)),
    }
}

impl Interpreter for PythonInterpreter {
    type Provider = Py<PyAny>;

    fn initialize(&mut self) -> Result<ErrorTypeHandle, RuntimeFault> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let binding = py
                .import(self.config.binding_module.as_str())
                .map_err(|err| fault_from_pyerr(py, &err))?;
            let error_type = resolve_in_binding(py, &binding, &self.config.error_type)
                .and_then(|ty| Ok(ty.downcast_into::<PyType>()?))
                .map_err(|err| fault_from_pyerr(py, &err))?;
            let factory = resolve_in_binding(py, &binding, &self.config.provider_factory)
                .map_err(|err| fault_from_pyerr(py, &err))?;

            let handle = qualified_type_name(&error_type)
                .map(ErrorTypeHandle::new)
                .map_err(|err| fault_from_pyerr(py, &err))?;
            info!(
                "Python runtime ready, binding {} with error type {}",
                self.config.binding_module,
                handle.qualified_name()
            );

            self.binding = Some(Binding {
                factory: factory.unbind(),
            });
            Ok(handle)
        })
    }

    fn finalize(&mut self) {
        // the interpreter itself stays alive for the life of the process
        debug!("Releasing Python binding handles");
        self.binding = None;
    }

    fn construct_provider(
        &mut self,
        env: &ProviderEnvironment,
        load_path: &Path,
    ) -> Result<Py<PyAny>, RuntimeFault> {
        Python::with_gil(|py| {
            let factory = self.factory(py)?;
            let env = environment_to_py(py, env).map_err(|err| fault_from_pyerr(py, &err))?;
            let path = load_path.to_string_lossy().into_owned();
            factory
                .call1((env, path))
                .map(Bound::unbind)
                .map_err(|err| fault_from_pyerr(py, &err))
        })
    }

    fn shutdown_provider(
        &mut self,
        provider: &Py<PyAny>,
        env: &ProviderEnvironment,
    ) -> Result<(), RuntimeFault> {
        let name = self.entry_point("shutdown");
        Python::with_gil(|py| {
            let env = environment_to_py(py, env).map_err(|err| fault_from_pyerr(py, &err))?;
            entry_point_fn(py, provider, &name)?
                .call1((env,))
                .map(|_| ())
                .map_err(|err| fault_from_pyerr(py, &err))
        })
    }

    fn invoke(
        &mut self,
        provider: &Py<PyAny>,
        function: &str,
        env: &ProviderEnvironment,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RuntimeFault> {
        let name = self.entry_point(function);
        Python::with_gil(|py| {
            let env = environment_to_py(py, env).map_err(|err| fault_from_pyerr(py, &err))?;
            let payload = json_to_py(py, payload).map_err(|err| fault_from_pyerr(py, &err))?;
            let result = entry_point_fn(py, provider, &name)?
                .call1((env, payload))
                .map_err(|err| fault_from_pyerr(py, &err))?;
            py_to_json(py, &result).map_err(|err| fault_from_pyerr(py, &err))
        })
    }

    /// Providers opt out of reloading with a falsy `<prefix>canUnload()`.
    fn can_unload(&mut self, provider: &Py<PyAny>) -> bool {
        let name = self.entry_point("canUnload");
        Python::with_gil(|py| {
            let Ok(function) = entry_point_fn(py, provider, &name) else {
                return true;
            };
            function
                .call0()
                .and_then(|answer| answer.is_truthy())
                .unwrap_or(true)
        })
    }
}
