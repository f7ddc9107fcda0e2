pub mod known;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use log::{debug, info, warn};
use rayon::prelude::*;
use crate::executor::Executor;
use crate::script::{ExecutionMode, Script};

pub use self::known::{known_commands, seeded_paths, EVAL, PATH_HELPER_PREFIX, WHICH};
pub use self::store::PathStore;

/// How a logical command name is turned into a path when nothing is cached.
#[derive(Clone)]
pub enum Discovery {
    /// `which <name>` on the host shell.
    Locator,
    /// `which <name>` after loading the login path setup, for tools shadowed by version managers.
    PathHelper,
    /// A caller-supplied discovery command; its trimmed output is the path.
    Script(Script),
    Fixed(String),
    /// In-process `PATH` search.
    SearchPath,
    With(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>),
}

impl Discovery {
    pub fn with<F>(f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Discovery::With(Arc::new(f))
    }
}

impl fmt::Debug for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discovery::Locator => f.write_str("Locator"),
            Discovery::PathHelper => f.write_str("PathHelper"),
            Discovery::Script(s) => f.debug_tuple("Script").field(&s.shell()).finish(),
            Discovery::Fixed(p) => f.debug_tuple("Fixed").field(p).finish(),
            Discovery::SearchPath => f.write_str("SearchPath"),
            Discovery::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Resolves logical command names to paths: memory, then the persisted store, then discovery.
pub struct PathCache {
    paths: RwLock<HashMap<String, String>>,
    discoveries: RwLock<HashMap<String, Discovery>>,
    store: PathStore,
    executor: Arc<Executor>,
}

impl PathCache {
    /// Seeds the fixed paths and registers the discovery of every known command.
    pub fn new(executor: Arc<Executor>, store: PathStore) -> Self {
        let paths = seeded_paths()
            .into_iter()
            .map(|(name, path)| (name.to_string(), path))
            .collect();
        let discoveries = known_commands()
            .into_iter()
            .map(|(name, discovery)| (name.to_string(), discovery))
            .collect();
        Self {
            paths: RwLock::new(paths),
            discoveries: RwLock::new(discoveries),
            store,
            executor,
        }
    }

    pub fn store(&self) -> &PathStore {
        &self.store
    }

    /// In-memory entry only.
    pub fn get(&self, name: &str) -> Option<String> {
        read(&self.paths).get(name).cloned()
    }

    /// Sets or clears the in-memory entry.
    pub fn set(&self, name: &str, path: Option<String>) {
        let mut paths = write(&self.paths);
        match path {
            Some(p) => paths.insert(name.to_string(), p),
            None => paths.remove(name),
        };
    }

    pub fn discovery(&self, name: &str) -> Option<Discovery> {
        read(&self.discoveries).get(name).cloned()
    }

    /// Registers how `name` is discovered without running anything.
    pub fn register_discovery(&self, name: &str, discovery: Discovery) {
        write(&self.discoveries).insert(name.to_string(), discovery);
    }

    /// Replaces the discovery for `name` (`None` means [`Discovery::Locator`]) and runs it
    /// right away, storing the found path in memory.
    pub fn set_discovery(&self, name: &str, discovery: Option<Discovery>) -> Option<String> {
        let discovery = discovery.unwrap_or(Discovery::Locator);
        self.register_discovery(name, discovery.clone());
        let found = self.discover(name, &discovery)?;
        self.set(name, Some(found.clone()));
        Some(found)
    }

    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(path) = self.get(name) {
            return Some(path);
        }
        if let Some(path) = self.persisted(name) {
            self.set(name, Some(path.clone()));
            return Some(path);
        }

        let discovery = self.discovery(name).unwrap_or(Discovery::Locator);
        let found = self.discover(name, &discovery)?;
        info!("resolved `{}` -> {}", name, found);
        self.write_back(name, &found);
        Some(found)
    }

    /// Drops `name` from memory and from the persisted store.
    pub fn forget(&self, name: &str) {
        self.set(name, None);
        if let Err(e) = self.store.remove(name) {
            warn!("could not remove `{}` from the path cache: {:#}", name, e);
        }
    }

    /// Resolves every registered command that is not in memory yet, in parallel.
    /// Returns how many were resolved.
    pub fn warm_up(&self) -> usize {
        let pending: Vec<String> = {
            let paths = read(&self.paths);
            read(&self.discoveries)
                .keys()
                .filter(|name| !paths.contains_key(*name))
                .cloned()
                .collect()
        };
        let resolved = pending.par_iter().filter(|name| self.resolve(name).is_some()).count();
        debug!("warm-up resolved {} of {} command(s)", resolved, pending.len());
        resolved
    }

    /// Persists every in-memory entry that exists on disk in one write.
    pub fn flush(&self) -> anyhow::Result<()> {
        let entries: Vec<(String, String)> = read(&self.paths)
            .iter()
            .filter(|(_, path)| Path::new(path.as_str()).exists())
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect();
        self.store.merge_all(entries)
    }

    /// Sorted copy of the in-memory map.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        read(&self.paths).iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    // Persisted entries may have gone stale since they were written.
    fn persisted(&self, name: &str) -> Option<String> {
        match self.store.get(name) {
            Ok(Some(path)) if Path::new(&path).exists() => Some(path),
            Ok(Some(path)) => {
                debug!("persisted path for `{}` is gone: {}", name, path);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("could not read the path cache: {:#}", e);
                None
            }
        }
    }

    fn write_back(&self, name: &str, path: &str) {
        self.set(name, Some(path.to_string()));
        // Shell builtins and command prefixes are fine in memory but are not files.
        if !Path::new(path).exists() {
            return;
        }
        if let Err(e) = self.store.merge(name, path) {
            warn!("could not persist `{}`: {:#}", name, e);
        }
    }

    fn discover(&self, name: &str, discovery: &Discovery) -> Option<String> {
        let found = match discovery {
            Discovery::Locator => self.run_discovery(&self.locator(name)),
            Discovery::PathHelper => {
                let prefix = self.get(EVAL).unwrap_or_else(|| PATH_HELPER_PREFIX.to_string());
                let script = Script::new(prefix, vec![self.which_path(), name.to_string()], ExecutionMode::host_shell());
                self.run_discovery(&script)
            }
            Discovery::Script(script) => self.run_discovery(script),
            Discovery::Fixed(path) => Some(path.clone()),
            Discovery::SearchPath => which::which(name).ok().map(|p| p.to_string_lossy().into_owned()),
            Discovery::With(fetch) => fetch(name),
        }?;

        let found = found.trim();
        if found.is_empty() {
            None
        } else {
            Some(found.to_string())
        }
    }

    fn locator(&self, name: &str) -> Script {
        Script::new(self.which_path(), vec![name.to_string()], ExecutionMode::host_shell())
    }

    fn which_path(&self) -> String {
        self.get(WHICH).unwrap_or_else(|| WHICH.to_string())
    }

    fn run_discovery(&self, script: &Script) -> Option<String> {
        match self.executor.execute(script) {
            Ok(output) => output,
            Err(e) => {
                debug!("discovery `{}` failed: {}", script.shell(), e);
                None
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
