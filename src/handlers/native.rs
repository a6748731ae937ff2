//! Native handlers loaded from shared libraries under a search root.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use libloading::Library;
use serde_json::Value;

use super::abi::{RawHandlerFn, call_native};
use super::registry::Handler;
use crate::capture::OutputSink;
use crate::error::ResolveError;
use crate::types::{HandlerRef, JsonObject, ModulePath};

/// A shared library opened for a module path.
pub struct NativeModule {
    module: ModulePath,
    path: PathBuf,
    library: Arc<Library>,
}

impl NativeModule {
    /// Open the library at `path`.
    pub fn open(module: &ModulePath, path: &Path) -> Result<Self, ResolveError> {
        // SAFETY: loading runs the library's initializers. Search roots are
        // operator-controlled directories, which is the trust boundary here.
        let library = unsafe { Library::new(path) }.map_err(|e| ResolveError::ModuleLoad {
            module: module.to_string(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(Self {
            module: module.clone(),
            path: path.to_path_buf(),
            library: Arc::new(library),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up an exported handler symbol.
    pub fn handler(&self, reference: &HandlerRef) -> Result<NativeHandler, ResolveError> {
        // SAFETY: exported handler symbols are required to have the
        // `RawHandlerFn` signature.
        let symbol = unsafe {
            self.library
                .get::<RawHandlerFn>(reference.symbol.as_str().as_bytes())
        }
        .map_err(|_| ResolveError::SymbolNotFound {
            module: self.module.to_string(),
            symbol: reference.symbol.to_string(),
        })?;

        Ok(NativeHandler {
            func: *symbol,
            _library: Some(self.library.clone()),
        })
    }
}

/// A handler symbol resolved from a native module.
///
/// Holds its library open for as long as the handler is alive.
pub struct NativeHandler {
    func: RawHandlerFn,
    _library: Option<Arc<Library>>,
}

impl NativeHandler {
    /// Wrap a handler function linked into the current binary.
    pub fn from_raw(func: RawHandlerFn) -> Self {
        Self {
            func,
            _library: None,
        }
    }
}

impl Handler for NativeHandler {
    fn call(&self, params: &JsonObject, context: &JsonObject, out: &OutputSink) -> Result<Value> {
        // SAFETY: `func` came from an exported handler symbol and `_library`
        // keeps its code mapped.
        unsafe { call_native(self.func, params, context, out) }
    }
}

/// Candidate library files for `module` under `root`.
///
/// `pkg.function` maps to `<root>/pkg/libfunction.so` on Linux, followed by
/// the unprefixed `<root>/pkg/function.so`.
pub fn library_candidates(root: &Path, module: &ModulePath) -> Vec<PathBuf> {
    let segments: Vec<&str> = module.segments().collect();
    let Some((name, parents)) = segments.split_last() else {
        return Vec::new();
    };

    let dir = parents.iter().fold(root.to_path_buf(), |dir, part| dir.join(part));
    let mut candidates = vec![dir.join(format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX))];
    if !DLL_PREFIX.is_empty() {
        candidates.push(dir.join(format!("{}{}", name, DLL_SUFFIX)));
    }
    candidates
}
