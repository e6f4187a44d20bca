//! Embedded Python runtime (`python` feature)
//!
//! [`PythonInterpreter`] implements the [`Interpreter`](pycim_kernel::Interpreter)
//! seam on top of pyo3. Python exceptions are converted into
//! [`RuntimeFault`](pycim_kernel::RuntimeFault)s while the GIL is held, so no
//! Python object escapes the execution gate.

pub mod convert;
mod interpreter;

pub use interpreter::PythonInterpreter;
