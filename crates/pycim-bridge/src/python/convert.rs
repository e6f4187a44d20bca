//! Conversions between Python objects and bridge types.

use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyInt, PyString, PyTuple, PyType};

use pycim_kernel::{FaultValue, ProviderEnvironment, RuntimeFault};

/// `module.qualname` of a Python type, e.g. `builtins.ValueError`.
pub fn qualified_type_name(ty: &Bound<'_, PyType>) -> PyResult<String> {
    let module: String = ty.getattr("__module__")?.extract()?;
    let qualname: String = ty.getattr("__qualname__")?.extract()?;
    Ok(format!("{}.{}", module, qualname))
}

/// Convert a raised Python exception into a runtime fault.
///
/// Arguments that cannot be read are reported as malformed instead of
/// failing the conversion.
pub fn fault_from_pyerr(py: Python<'_>, err: &PyErr) -> RuntimeFault {
    let ty = err.get_type(py);
    let type_name =
        qualified_type_name(&ty).unwrap_or_else(|_| "builtins.BaseException".into());

    let mut fault = RuntimeFault::new(type_name.clone());
    fault.lineage = lineage(&ty).unwrap_or_else(|_| vec![type_name]);

    fault = match fault_args(err.value(py).as_any()) {
        Ok(args) => fault.with_args(args),
        Err(e) => fault.with_malformed_args(e.to_string()),
    };

    if let Some(traceback) = err.traceback(py) {
        match traceback.format() {
            Ok(text) => fault = fault.with_trace(text),
            Err(e) => tracing::debug!("Cannot format traceback: {}", e),
        }
    }
    fault
}

fn lineage(ty: &Bound<'_, PyType>) -> PyResult<Vec<String>> {
    let mro = ty.getattr("__mro__")?;
    let mro = mro.downcast::<PyTuple>()?;
    mro.iter()
        .map(|base| qualified_type_name(base.downcast::<PyType>()?))
        .collect()
}

fn fault_args(value: &Bound<'_, PyAny>) -> PyResult<Vec<FaultValue>> {
    let args = value.getattr("args")?;
    let args = args
        .downcast::<PyTuple>()
        .map_err(|_| PyTypeError::new_err("exception args is not a tuple"))?;

    args.iter()
        .map(|arg| {
            if arg.is_instance_of::<PyInt>() && !arg.is_instance_of::<PyBool>() {
                match arg.extract::<i64>() {
                    Ok(value) => return Ok(FaultValue::Int(value)),
                    // too large for i64, keep the digits
                    Err(_) => return Ok(FaultValue::Other(arg.str()?.to_string())),
                }
            }
            if let Ok(text) = arg.downcast::<PyString>() {
                return Ok(FaultValue::Str(text.to_str()?.to_string()));
            }
            Ok(FaultValue::Other(arg.repr()?.to_string()))
        })
        .collect()
}

/// Python dict handed to provider entry points as their environment.
pub fn environment_to_py<'py>(
    py: Python<'py>,
    env: &ProviderEnvironment,
) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("module_name", env.module_name.as_str())?;
    dict.set_item("provider_name", env.provider_name.as_str())?;
    dict.set_item("user_name", env.user_name.as_deref())?;
    dict.set_item("content_language", env.content_language.as_deref())?;
    match &env.subscription {
        Some(subscription) => {
            let sub = PyDict::new(py);
            sub.set_item("namespace", subscription.namespace.as_str())?;
            sub.set_item("filter_name", subscription.filter_name.as_str())?;
            sub.set_item("handler_name", subscription.handler_name.as_str())?;
            dict.set_item("subscription", sub)?;
        }
        None => dict.set_item("subscription", py.None())?,
    }
    Ok(dict)
}

/// JSON value to Python object, through the `json` module.
pub fn json_to_py<'py>(
    py: Python<'py>,
    value: &serde_json::Value,
) -> PyResult<Bound<'py, PyAny>> {
    let text = serde_json::to_string(value)
        .map_err(|e| PyTypeError::new_err(format!("payload is not serializable: {}", e)))?;
    py.import("json")?.call_method1("loads", (text,))
}

/// Python object to JSON value. Objects `json` cannot encode are stringified.
pub fn py_to_json(py: Python<'_>, value: &Bound<'_, PyAny>) -> PyResult<serde_json::Value> {
    if value.is_none() {
        return Ok(serde_json::Value::Null);
    }
    let json = py.import("json")?;
    let kwargs = PyDict::new(py);
    kwargs.set_item("default", py.import("builtins")?.getattr("str")?)?;
    let text: String = json
        .call_method("dumps", (value,), Some(&kwargs))?
        .extract()?;
    serde_json::from_str(&text)
        .map_err(|e| PyTypeError::new_err(format!("provider result is not valid JSON: {}", e)))
}
