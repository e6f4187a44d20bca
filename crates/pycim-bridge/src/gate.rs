//! Execution context gate
//!
//! Owns the single embedded execution context. Every call into the runtime
//! (provider construction, shutdown, operation invocation) goes through
//! [`ExecutionGate::with_exclusive_access`] or [`ExecutionGate::invoke`], so
//! the runtime only ever runs one task at a time.

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use pycim_kernel::{ErrorTypeHandle, GateError, Interpreter, RuntimeFault};

/// Failure of a gated runtime call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The gate refused the call.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The runtime raised a failure.
    #[error("runtime fault: {0}")]
    Fault(RuntimeFault),
}

/// Home execution state recorded at startup.
#[derive(Debug, Clone)]
struct HomeState {
    thread: ThreadId,
    error_type: ErrorTypeHandle,
}

enum GateState<I> {
    Uninitialized(I),
    Running { interpreter: I, home: HomeState },
    Closed,
}

/// Serializes all access to the embedded execution context.
pub struct ExecutionGate<I: Interpreter> {
    state: Mutex<GateState<I>>,
}

impl<I: Interpreter> ExecutionGate<I> {
    pub fn new(interpreter: I) -> Self {
        Self {
            state: Mutex::new(GateState::Uninitialized(interpreter)),
        }
    }

    /// Start the runtime. Must be called once, before any provider is loaded.
    pub fn initialize(&self) -> Result<ErrorTypeHandle, GateError> {
        let mut state = self.state.lock();
        let mut interpreter = match std::mem::replace(&mut *state, GateState::Closed) {
            GateState::Uninitialized(interpreter) => interpreter,
            running @ GateState::Running { .. } => {
                *state = running;
                return Err(GateError::AlreadyInitialized);
            }
            GateState::Closed => return Err(GateError::Closed),
        };

        info!("Initializing embedded execution context");
        let started = panic::catch_unwind(AssertUnwindSafe(|| interpreter.initialize()))
            .unwrap_or_else(|payload| Err(fault_from_panic(payload)));

        match started {
            Ok(error_type) => {
                let home = HomeState {
                    thread: thread::current().id(),
                    error_type: error_type.clone(),
                };
                debug!(
                    "Execution context home state recorded on {:?}, error type {}",
                    home.thread,
                    error_type.qualified_name()
                );
                *state = GateState::Running { interpreter, home };
                Ok(error_type)
            }
            Err(fault) => {
                error!("Execution context failed to start: {}", fault);
                *state = GateState::Uninitialized(interpreter);
                Err(GateError::Startup(fault))
            }
        }
    }

    /// Tear the runtime down. Nothing may use the gate afterwards.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, GateState::Closed) {
            GateState::Running {
                mut interpreter,
                home,
            } => {
                info!(
                    "Shutting down execution context (home state from {:?})",
                    home.thread
                );
                if panic::catch_unwind(AssertUnwindSafe(|| interpreter.finalize())).is_err() {
                    error!("Execution context panicked during teardown");
                }
            }
            GateState::Uninitialized(_) => {
                debug!("Closing execution context that was never started");
            }
            GateState::Closed => warn!("Execution context already shut down"),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), GateState::Running { .. })
    }

    /// Management-error type handle captured at startup.
    pub fn error_type(&self) -> Option<ErrorTypeHandle> {
        match &*self.state.lock() {
            GateState::Running { home, .. } => Some(home.error_type.clone()),
            _ => None,
        }
    }

    /// Run `f` with exclusive access to the runtime.
    ///
    /// The lock is released on every exit path, including unwinding.
    pub fn with_exclusive_access<R>(&self, f: impl FnOnce(&mut I) -> R) -> Result<R, GateError> {
        let mut state = self.state.lock();
        match &mut *state {
            GateState::Running { interpreter, .. } => Ok(f(interpreter)),
            GateState::Uninitialized(_) => Err(GateError::NotInitialized),
            GateState::Closed => Err(GateError::Closed),
        }
    }

    /// Run a fallible runtime call with exclusive access.
    ///
    /// A panic escaping the runtime is caught here and reported as an
    /// internal fault.
    pub fn invoke<R>(
        &self,
        f: impl FnOnce(&mut I) -> Result<R, RuntimeFault>,
    ) -> Result<R, CallError> {
        self.with_exclusive_access(|interpreter| {
            panic::catch_unwind(AssertUnwindSafe(|| f(interpreter)))
                .unwrap_or_else(|payload| Err(fault_from_panic(payload)))
        })?
        .map_err(CallError::Fault)
    }
}

impl<I: Interpreter> std::fmt::Debug for ExecutionGate<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.try_lock().as_deref() {
            Some(GateState::Uninitialized(_)) => "uninitialized",
            Some(GateState::Running { .. }) => "running",
            Some(GateState::Closed) => "closed",
            None => "busy",
        };
        f.debug_struct("ExecutionGate")
            .field("state", &state)
            .finish()
    }
}

fn fault_from_panic(payload: Box<dyn Any + Send>) -> RuntimeFault {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("Panic inside the execution context: {}", message);
    RuntimeFault::internal(format!("panic inside execution context: {}", message))
        .with_trace(format!("panic: {}", message))
}
