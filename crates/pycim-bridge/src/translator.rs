//! Runtime fault to CIM exception translation

use std::panic::Location;
use std::path::Path;
use tracing::error;

use pycim_kernel::{
    CimException, CimStatusCode, ErrorTypeHandle, FaultArgs, FaultValue, RuntimeFault,
};

/// Converts failures raised inside the execution context into the server's
/// structured exceptions.
#[derive(Debug, Clone)]
pub struct ExceptionTranslator {
    error_type: ErrorTypeHandle,
}

impl ExceptionTranslator {
    pub fn new(error_type: ErrorTypeHandle) -> Self {
        Self { error_type }
    }

    pub fn error_type(&self) -> &ErrorTypeHandle {
        &self.error_type
    }

    /// Translate a fault raised while serving the provider at `provider_path`.
    ///
    /// Never fails. The caller's location is attached as provenance.
    #[track_caller]
    pub fn translate(&self, fault: &RuntimeFault, provider_path: &Path) -> CimException {
        let location = Location::caller();
        let exception = match (&fault.args, fault.is_instance_of(&self.error_type)) {
            (FaultArgs::Extracted(args), true) => {
                let (code, message) = Self::scan_args(args);
                let message = message.unwrap_or_else(|| {
                    format!("thrown from provider: {}", provider_path.display())
                });
                error!(
                    "Provider {} raised {}: {}",
                    provider_path.display(),
                    code,
                    message
                );
                CimException::new(code, message)
            }
            (FaultArgs::Malformed(reason), true) => {
                error!(
                    "Provider {} raised {} with unreadable arguments ({}), treating as a generic failure",
                    provider_path.display(),
                    fault.type_name,
                    reason
                );
                Self::generic(fault)
            }
            (_, false) => {
                error!(
                    "Provider {} raised {}",
                    provider_path.display(),
                    fault.type_name
                );
                Self::generic(fault)
            }
        };
        exception.at(location.file(), location.line())
    }

    /// Diagnostic text for a fault. Never empty.
    pub fn trace(fault: &RuntimeFault) -> String {
        let trace = fault.trace.trim_end();
        if trace.is_empty() {
            fault.to_string()
        } else {
            format!("{}\n{}", trace, fault)
        }
    }

    fn generic(fault: &RuntimeFault) -> CimException {
        CimException::new(
            CimStatusCode::FAILED,
            format!("from provider code. Trace: {}", Self::trace(fault)),
        )
    }

    /// First integer is the code, first string the message.
    fn scan_args(args: &[FaultValue]) -> (CimStatusCode, Option<String>) {
        let mut code = None;
        let mut message = None;
        for arg in args {
            match arg {
                FaultValue::Int(value) if code.is_none() => {
                    code = Some(CimStatusCode::from_raised(*value))
                }
                FaultValue::Str(text) if message.is_none() => message = Some(text.clone()),
                _ => {}
            }
            if code.is_some() && message.is_some() {
                break;
            }
        }
        (code.unwrap_or(CimStatusCode::FAILED), message)
    }
}
