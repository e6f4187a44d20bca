//! Provider name resolution
//!
//! Maps the module location carried in a request's provider-id container to
//! the on-disk source file the runtime loads.

use std::path::{Path, PathBuf};
use tracing::{debug, error};

use pycim_kernel::{BridgeError, BridgeResult, ProviderIdContainer, ProviderIdentity};

/// Normalize a provider location to its source file name.
///
/// `foo` becomes `foo.py`, `foo.pyc` becomes `foo.py`, `foo.py` is kept.
pub fn get_py_file(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".pyc") {
        format!("{}.py", stem)
    } else if name.ends_with(".py") {
        name.to_string()
    } else {
        format!("{}.py", name)
    }
}

/// Resolves provider identities against a provider directory.
#[derive(Debug, Clone)]
pub struct NameResolver {
    provider_dir: PathBuf,
}

impl NameResolver {
    pub fn new<P: AsRef<Path>>(provider_dir: P) -> Self {
        Self {
            provider_dir: provider_dir.as_ref().to_path_buf(),
        }
    }

    /// Absolute locations are kept, relative ones land under the provider
    /// directory.
    pub fn resolve_physical_name(&self, location: &str) -> PathBuf {
        let file = get_py_file(location);
        let path = Path::new(&file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.provider_dir.join(path)
        }
    }

    pub fn resolve(&self, provider_id: &ProviderIdContainer) -> BridgeResult<ProviderIdentity> {
        if provider_id.location.is_empty() {
            if !provider_id.remote_namespace {
                error!(
                    "Provider module {} not found: empty location for provider {}",
                    provider_id.module_name, provider_id.provider_name
                );
            }
            return Err(BridgeError::NoSuchProvider(format!(
                "module {} has no location",
                provider_id.module_name
            )));
        }

        let load_path = self.resolve_physical_name(&provider_id.location);
        debug!(
            "Resolved provider {}/{} to {}",
            provider_id.module_name,
            provider_id.provider_name,
            load_path.display()
        );
        Ok(ProviderIdentity {
            module_name: provider_id.module_name.clone(),
            provider_name: provider_id.provider_name.clone(),
            load_path,
            remote_namespace: provider_id.remote_namespace,
        })
    }
}
