//! Shared fixtures for the bridge integration tests.
//!
//! [`ScriptedInterpreter`] stands in for the embedded runtime. Its behavior is
//! driven through a [`Script`] handle the test keeps, which also records every
//! construction, shutdown and call.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pycim_bridge::{HandlerSet, ProviderManager};
use pycim_kernel::{
    BridgeConfig, CimRequest, ErrorTypeHandle, FaultValue, Interpreter, OperationContext,
    ProviderEnvironment, ProviderIdContainer, RequestKind, RuntimeFault,
};

pub const ERROR_TYPE: &str = "pywbem.CIMError";

/// Provider object handed out by [`ScriptedInterpreter`].
#[derive(Debug)]
pub struct MockProvider {
    pub path: PathBuf,
    /// Order of construction, starting at 1
    pub serial: usize,
}

#[derive(Default)]
struct ScriptState {
    constructed: Vec<PathBuf>,
    shutdowns: Vec<(PathBuf, usize)>,
    calls: Vec<(PathBuf, String, ProviderEnvironment)>,
    construct_faults: HashMap<PathBuf, RuntimeFault>,
    call_faults: HashMap<String, RuntimeFault>,
    panics: HashSet<String>,
    pinned: HashSet<PathBuf>,
    construct_delay: Option<Duration>,
    finalized: bool,
}

/// Test-side handle controlling and observing a [`ScriptedInterpreter`].
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interpreter(&self) -> ScriptedInterpreter {
        ScriptedInterpreter {
            script: self.clone(),
        }
    }

    /// Constructing the provider at `path` raises `fault`.
    pub fn fail_construct(&self, path: &Path, fault: RuntimeFault) {
        self.state
            .lock()
            .construct_faults
            .insert(path.to_path_buf(), fault);
    }

    /// Calling `function` on any provider raises `fault`.
    pub fn fail_call(&self, function: &str, fault: RuntimeFault) {
        self.state
            .lock()
            .call_faults
            .insert(function.to_string(), fault);
    }

    /// Calling `function` panics inside the runtime.
    pub fn panic_on(&self, function: &str) {
        self.state.lock().panics.insert(function.to_string());
    }

    /// The provider at `path` refuses to be unloaded.
    pub fn pin(&self, path: &Path) {
        self.state.lock().pinned.insert(path.to_path_buf());
    }

    pub fn slow_construct(&self, delay: Duration) {
        self.state.lock().construct_delay = Some(delay);
    }

    pub fn constructions(&self) -> usize {
        self.state.lock().constructed.len()
    }

    pub fn constructions_of(&self, path: &Path) -> usize {
        self.state
            .lock()
            .constructed
            .iter()
            .filter(|p| p.as_path() == path)
            .count()
    }

    /// Serials of the providers shut down so far, in order.
    pub fn shutdown_serials(&self) -> Vec<usize> {
        self.state
            .lock()
            .shutdowns
            .iter()
            .map(|(_, serial)| *serial)
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|(_, function, _)| function.clone())
            .collect()
    }

    pub fn last_environment(&self) -> Option<ProviderEnvironment> {
        self.state.lock().calls.last().map(|(_, _, env)| env.clone())
    }

    pub fn finalized(&self) -> bool {
        self.state.lock().finalized
    }
}

/// Scripted stand-in for the embedded runtime.
pub struct ScriptedInterpreter {
    script: Script,
}

impl Interpreter for ScriptedInterpreter {
    type Provider = MockProvider;

    fn initialize(&mut self) -> Result<ErrorTypeHandle, RuntimeFault> {
        Ok(ErrorTypeHandle::new(ERROR_TYPE))
    }

    fn finalize(&mut self) {
        self.script.state.lock().finalized = true;
    }

    fn construct_provider(
        &mut self,
        _env: &ProviderEnvironment,
        load_path: &Path,
    ) -> Result<MockProvider, RuntimeFault> {
        let delay = self.script.state.lock().construct_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.script.state.lock();
        if let Some(fault) = state.construct_faults.get(load_path) {
            return Err(fault.clone());
        }
        state.constructed.push(load_path.to_path_buf());
        Ok(MockProvider {
            path: load_path.to_path_buf(),
            serial: state.constructed.len(),
        })
    }

    fn shutdown_provider(
        &mut self,
        provider: &MockProvider,
        _env: &ProviderEnvironment,
    ) -> Result<(), RuntimeFault> {
        let mut state = self.script.state.lock();
        state
            .shutdowns
            .push((provider.path.clone(), provider.serial));
        match state.call_faults.get("shutdown") {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    fn invoke(
        &mut self,
        provider: &MockProvider,
        function: &str,
        env: &ProviderEnvironment,
        payload: &Value,
    ) -> Result<Value, RuntimeFault> {
        let mut state = self.script.state.lock();
        state
            .calls
            .push((provider.path.clone(), function.to_string(), env.clone()));
        if state.panics.contains(function) {
            drop(state);
            panic!("provider runtime crashed in {}", function);
        }
        if let Some(fault) = state.call_faults.get(function) {
            return Err(fault.clone());
        }
        Ok(json!({
            "function": function,
            "serial": provider.serial,
            "payload": payload,
        }))
    }

    fn can_unload(&mut self, provider: &MockProvider) -> bool {
        !self.script.state.lock().pinned.contains(&provider.path)
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn manager(script: &Script, provider_dir: &Path) -> ProviderManager<ScriptedInterpreter> {
    manager_with(script, BridgeConfig::default().with_provider_dir(provider_dir))
}

pub fn manager_with(script: &Script, config: BridgeConfig) -> ProviderManager<ScriptedInterpreter> {
    ProviderManager::new(config, script.interpreter(), HandlerSet::passthrough())
        .expect("manager starts")
}

pub fn context(location: &str) -> OperationContext {
    OperationContext::new(ProviderIdContainer::new(
        "TestModule",
        "TestProvider",
        location,
    ))
}

pub fn request(kind: RequestKind, location: &str) -> CimRequest {
    CimRequest::new(format!("msg-{}", kind), kind, context(location))
}

/// Raised management error with the given arguments.
pub fn cim_error(args: Vec<FaultValue>) -> RuntimeFault {
    RuntimeFault::new(ERROR_TYPE)
        .with_base("builtins.Exception")
        .with_args(args)
}

/// Create `name` under `dir` with its modification time `age` in the past.
pub fn provider_file(dir: &Path, name: &str, age: Duration) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create provider file");
    file.set_modified(SystemTime::now() - age)
        .expect("set modification time");
    path
}

/// Move the modification time of `path` to now.
pub fn touch(path: &Path) {
    let file = File::options()
        .write(true)
        .open(path)
        .expect("open provider file");
    file.set_modified(SystemTime::now())
        .expect("set modification time");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pycim_bridge=debug")
        .with_test_writer()
        .try_init();
}
