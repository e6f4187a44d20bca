//! Provider cache and activation tracker
//!
//! Loaded providers are cached by load path. An entry is replaced when the
//! provider file's modification time moves past the recorded one and the
//! provider agreed to be unloaded. All map and activation-count mutations
//! happen under the cache lock.
//!
//! Lock order: the cache lock may be held while the gate lock is taken (a
//! first load happens under both). The gate lock is never held while the
//! cache lock is taken.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use pycim_kernel::{BridgeResult, Interpreter, OperationContext, ProviderIdContainer};

use crate::loader::{ProviderLoader, modification_time};

// ============================================================================
// Entries
// ============================================================================

struct CacheEntry<P> {
    handle: Arc<P>,
    mod_time: SystemTime,
    last_access: SystemTime,
    activation_count: i64,
    can_unload: bool,
    generation: u64,
    /// Set while the entry is being shut down outside the lock
    retiring: bool,
    /// Identity of the request that loaded the entry, used for shutdowns
    /// that have no request of their own
    origin: ProviderIdContainer,
}

impl<P> CacheEntry<P> {
    fn snapshot(&self, load_path: &Path) -> ProviderRef<P> {
        ProviderRef {
            load_path: load_path.to_path_buf(),
            handle: Arc::clone(&self.handle),
            mod_time: self.mod_time,
            last_access: self.last_access,
            activation_count: self.activation_count,
            can_unload: self.can_unload,
            generation: self.generation,
        }
    }
}

/// Caller-side view of a cached provider.
///
/// The handle is shared with the cache; the remaining fields are a copy taken
/// when the reference was handed out.
pub struct ProviderRef<P> {
    load_path: PathBuf,
    handle: Arc<P>,
    mod_time: SystemTime,
    last_access: SystemTime,
    activation_count: i64,
    can_unload: bool,
    generation: u64,
}

impl<P> ProviderRef<P> {
    pub fn load_path(&self) -> &Path {
        &self.load_path
    }

    pub fn handle(&self) -> &Arc<P> {
        &self.handle
    }

    pub fn mod_time(&self) -> SystemTime {
        self.mod_time
    }

    pub fn last_access(&self) -> SystemTime {
        self.last_access
    }

    pub fn activation_count(&self) -> i64 {
        self.activation_count
    }

    pub fn can_unload(&self) -> bool {
        self.can_unload
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<P> Clone for ProviderRef<P> {
    fn clone(&self) -> Self {
        Self {
            load_path: self.load_path.clone(),
            handle: Arc::clone(&self.handle),
            mod_time: self.mod_time,
            last_access: self.last_access,
            activation_count: self.activation_count,
            can_unload: self.can_unload,
            generation: self.generation,
        }
    }
}

impl<P> std::fmt::Debug for ProviderRef<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRef")
            .field("load_path", &self.load_path)
            .field("mod_time", &self.mod_time)
            .field("last_access", &self.last_access)
            .field("activation_count", &self.activation_count)
            .field("can_unload", &self.can_unload)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently cached
    pub entries: usize,
    /// Entries with a positive activation count
    pub active_entries: usize,
    /// Successful provider constructions
    pub loads: u64,
    /// Stale entries replaced after a file change
    pub reloads: u64,
    /// Resolutions served from the cache
    pub hits: u64,
    /// Entries removed by the idle sweep
    pub evictions: u64,
}

struct CacheState<P> {
    entries: HashMap<PathBuf, CacheEntry<P>>,
    next_generation: u64,
    stats: CacheStats,
}

enum Lookup<P> {
    Hit(ProviderRef<P>),
    /// Stale entry this resolver must shut down
    Retire(ProviderRef<P>, ProviderIdContainer),
    /// Stale entry another resolver is already shutting down
    TakeOver,
    Missing,
}

// ============================================================================
// Cache
// ============================================================================

/// Provider instances keyed by load path.
pub struct ProviderCache<I: Interpreter> {
    state: Mutex<CacheState<I::Provider>>,
    loader: ProviderLoader<I>,
    clamp_activation: bool,
}

impl<I: Interpreter> ProviderCache<I> {
    pub fn new(loader: ProviderLoader<I>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_generation: 1,
                stats: CacheStats::default(),
            }),
            loader,
            clamp_activation: true,
        }
    }

    pub fn with_clamp_activation(mut self, clamp: bool) -> Self {
        self.clamp_activation = clamp;
        self
    }

    /// Return the cached provider for `load_path`, loading or reloading it
    /// as needed.
    pub fn resolve(
        &self,
        load_path: &Path,
        ctx: &OperationContext,
    ) -> BridgeResult<ProviderRef<I::Provider>> {
        let mut state = self.state.lock();

        match Self::lookup(&mut state, load_path) {
            Lookup::Hit(provider) => return Ok(provider),
            Lookup::Missing => {}
            Lookup::TakeOver => {
                debug!(
                    "Provider {} is being retired elsewhere, loading a fresh copy",
                    load_path.display()
                );
                state.entries.remove(load_path);
                state.stats.reloads += 1;
            }
            Lookup::Retire(stale, origin) => {
                info!(
                    "Provider {} changed on disk, reloading",
                    load_path.display()
                );
                let stale_ctx = OperationContext::new(origin);
                MutexGuard::unlocked(&mut state, || {
                    self.loader
                        .shutdown(load_path, stale.handle(), &stale_ctx)
                });

                let state = &mut *state;
                match state.entries.get_mut(load_path) {
                    Some(entry) if entry.generation == stale.generation() => {
                        state.entries.remove(load_path);
                        state.stats.reloads += 1;
                    }
                    Some(entry) => {
                        debug!(
                            "Provider {} was replaced while retiring (generation {})",
                            load_path.display(),
                            entry.generation
                        );
                        entry.last_access = SystemTime::now();
                        state.stats.hits += 1;
                        return Ok(entry.snapshot(load_path));
                    }
                    None => state.stats.reloads += 1,
                }
            }
        }

        let loaded = self.loader.load(load_path, ctx)?;

        let state = &mut *state;
        let generation = state.next_generation;
        state.next_generation += 1;
        let entry = CacheEntry {
            handle: loaded.handle,
            mod_time: loaded.mod_time,
            last_access: SystemTime::now(),
            activation_count: 0,
            can_unload: loaded.can_unload,
            generation,
            retiring: false,
            origin: ctx.provider_id.clone(),
        };
        let provider = entry.snapshot(load_path);
        state.entries.insert(load_path.to_path_buf(), entry);
        state.stats.loads += 1;
        debug!(
            "Cached provider {} (generation {})",
            load_path.display(),
            generation
        );
        Ok(provider)
    }

    fn lookup(state: &mut CacheState<I::Provider>, load_path: &Path) -> Lookup<I::Provider> {
        let Some(entry) = state.entries.get_mut(load_path) else {
            return Lookup::Missing;
        };
        entry.last_access = SystemTime::now();

        if entry.retiring {
            return Lookup::TakeOver;
        }
        if !entry.can_unload || modification_time(load_path) <= entry.mod_time {
            state.stats.hits += 1;
            return Lookup::Hit(entry.snapshot(load_path));
        }

        entry.retiring = true;
        Lookup::Retire(entry.snapshot(load_path), entry.origin.clone())
    }

    // ------------------------------------------------------------------------
    // Activation tracking
    // ------------------------------------------------------------------------

    /// Record a new subscription against the provider.
    pub fn increment_activation(&self, provider: &mut ProviderRef<I::Provider>) {
        self.adjust_activation(provider, 1);
    }

    /// Record a removed subscription against the provider.
    pub fn decrement_activation(&self, provider: &mut ProviderRef<I::Provider>) {
        self.adjust_activation(provider, -1);
    }

    fn adjust_activation(&self, provider: &mut ProviderRef<I::Provider>, delta: i64) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(provider.load_path()) else {
            warn!(
                "Activation change for uncached provider {} ignored",
                provider.load_path().display()
            );
            return;
        };

        let mut next = entry.activation_count + delta;
        if next < 0 && self.clamp_activation {
            warn!(
                "Activation count of {} would drop below zero, keeping it at zero",
                provider.load_path().display()
            );
            next = 0;
        }
        entry.activation_count = next;
        provider.activation_count = next;
        debug!(
            "Activation count of {} is now {}",
            provider.load_path().display(),
            next
        );
    }

    /// Number of providers with a positive activation count.
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.activation_count > 0)
            .count()
    }

    pub fn has_active_providers(&self) -> bool {
        self.active_count() > 0
    }

    // ------------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------------

    /// Unload providers without subscriptions that were last used more than
    /// `idle_timeout` before `now`. Returns the number unloaded.
    ///
    /// Providers still referenced by a request in flight are kept.
    pub fn unload_idle(&self, now: SystemTime, idle_timeout: Duration) -> usize {
        let evicted: Vec<_> = {
            let mut state = self.state.lock();
            let idle: Vec<PathBuf> = state
                .entries
                .iter()
                .filter(|(_, entry)| {
                    !entry.retiring
                        && entry.activation_count <= 0
                        && Arc::strong_count(&entry.handle) == 1
                        && now
                            .duration_since(entry.last_access)
                            .is_ok_and(|idle_for| idle_for > idle_timeout)
                })
                .map(|(path, _)| path.clone())
                .collect();

            let evicted: Vec<_> = idle
                .into_iter()
                .filter_map(|path| state.entries.remove(&path).map(|entry| (path, entry)))
                .collect();
            state.stats.evictions += evicted.len() as u64;
            evicted
        };

        for (path, entry) in &evicted {
            info!("Unloading idle provider {}", path.display());
            self.shutdown_entry(path, entry);
        }
        evicted.len()
    }

    /// Remove and shut down every cached provider.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = self.state.lock().entries.drain().collect();
        for (path, entry) in &drained {
            if entry.activation_count > 0 {
                warn!(
                    "Shutting down provider {} with {} active subscriptions",
                    path.display(),
                    entry.activation_count
                );
            }
            self.shutdown_entry(path, entry);
        }
        drained.len()
    }

    fn shutdown_entry(&self, path: &Path, entry: &CacheEntry<I::Provider>) {
        let ctx = OperationContext::new(entry.origin.clone());
        self.loader.shutdown(path, &entry.handle, &ctx);
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current view of the entry for `load_path`, without touching its
    /// access time.
    pub fn snapshot(&self, load_path: &Path) -> Option<ProviderRef<I::Provider>> {
        self.state
            .lock()
            .entries
            .get(load_path)
            .map(|entry| entry.snapshot(load_path))
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            active_entries: state
                .entries
                .values()
                .filter(|entry| entry.activation_count > 0)
                .count(),
            ..state.stats.clone()
        }
    }
}

impl<I: Interpreter> std::fmt::Debug for ProviderCache<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCache")
            .field("stats", &self.stats())
            .field("clamp_activation", &self.clamp_activation)
            .finish()
    }
}
