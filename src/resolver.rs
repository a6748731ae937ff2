//! Handler resolution.
//!
//! The resolver is process-scoped state created at startup and shared by
//! reference with every request. It owns:
//! - the set of registered search roots (each `HandlerDir` at most once, in
//!   first-use order, never evicted);
//! - the cache of opened native modules, keyed by library path;
//! - the table of handlers linked into the binary.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::handlers::native::library_candidates;
use crate::handlers::{Handler, HandlerRegistry, NativeModule};
use crate::types::{HandlerRef, ModulePath};

#[derive(Default)]
struct SearchRoots {
    members: HashSet<PathBuf>,
    order: Vec<PathBuf>,
}

/// Resolves `<module>.<symbol>` references against registered directories.
#[derive(Default)]
pub struct HandlerResolver {
    roots: RwLock<SearchRoots>,
    modules: RwLock<HashMap<PathBuf, Arc<NativeModule>>>,
    handlers: RwLock<HashMap<(PathBuf, String), Arc<dyn Handler>>>,
    registry: HandlerRegistry,
}

impl HandlerResolver {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            ..Default::default()
        }
    }

    /// Register `dir` as a search root.
    ///
    /// Returns `true` only for the call that actually added it; concurrent
    /// or repeated registrations of the same directory are no-ops.
    pub fn register_root(&self, dir: &Path) -> bool {
        if self.roots.read().members.contains(dir) {
            return false;
        }

        let mut roots = self.roots.write();
        if !roots.members.insert(dir.to_path_buf()) {
            return false;
        }
        roots.order.push(dir.to_path_buf());
        info!("Registered handler directory {}", dir.display());
        true
    }

    /// Registered search roots in registration order.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.read().order.clone()
    }

    /// Resolve `reference` after making sure `handler_dir` is registered.
    ///
    /// Libraries under `handler_dir` take precedence over other roots, and
    /// any root takes precedence over the built-in table.
    pub fn resolve(
        &self,
        reference: &str,
        handler_dir: &str,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        let reference = HandlerRef::parse(reference)?;
        let handler_dir = PathBuf::from(handler_dir);
        self.register_root(&handler_dir);

        let search_order = self.search_order(&handler_dir);
        if let Some(library) = find_library(&search_order, &reference.module) {
            return self.resolve_native(&reference, &library);
        }

        if self.registry.has_module(&reference.module) {
            return self
                .registry
                .get(&reference.module, &reference.symbol)
                .ok_or_else(|| ResolveError::SymbolNotFound {
                    module: reference.module.to_string(),
                    symbol: reference.symbol.to_string(),
                });
        }

        Err(ResolveError::ModuleNotFound {
            module: reference.module.into_inner(),
            searched: search_order,
        })
    }

    fn search_order(&self, first: &Path) -> Vec<PathBuf> {
        let roots = self.roots.read();
        std::iter::once(first.to_path_buf())
            .chain(roots.order.iter().filter(|root| *root != first).cloned())
            .collect()
    }

    fn resolve_native(
        &self,
        reference: &HandlerRef,
        library: &Path,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        let key = (library.to_path_buf(), reference.symbol.to_string());
        if let Some(handler) = self.handlers.read().get(&key) {
            return Ok(handler.clone());
        }

        let module = self.load_module(&reference.module, library)?;
        let handler: Arc<dyn Handler> = Arc::new(module.handler(reference)?);

        // A racing resolution may have inserted first; keep that one.
        let mut handlers = self.handlers.write();
        Ok(handlers.entry(key).or_insert(handler).clone())
    }

    fn load_module(
        &self,
        module: &ModulePath,
        library: &Path,
    ) -> Result<Arc<NativeModule>, ResolveError> {
        if let Some(loaded) = self.modules.read().get(library) {
            return Ok(loaded.clone());
        }

        // Opened outside the lock; a racing load of the same path is dropped
        // in favour of the first one inserted.
        let opened = Arc::new(NativeModule::open(module, library)?);
        match self.modules.write().entry(library.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                debug!("Loaded module '{}' from {}", module, opened.path().display());
                Ok(entry.insert(opened).clone())
            }
        }
    }
}

/// First existing library file for `module` across `roots`.
fn find_library(roots: &[PathBuf], module: &ModulePath) -> Option<PathBuf> {
    roots
        .iter()
        .flat_map(|root| library_candidates(root, module))
        .find(|candidate| candidate.is_file())
        .map(|candidate| std::fs::canonicalize(&candidate).unwrap_or(candidate))
}
