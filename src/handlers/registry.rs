//! Handler trait and the compile-time handler table.
//!
//! Provides a `Handler` trait for anything the executor can call and a
//! `HandlerRegistry` for handlers linked into the executor binary.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::capture::OutputSink;
use crate::types::{JsonObject, ModulePath, SymbolName};

/// A callable resolved from a handler reference.
///
/// Handlers receive the caller's params, the process-wide context and the
/// invocation's output sink. Any returned error is reported to the caller as
/// a failed invocation carrying the error's message.
pub trait Handler: Send + Sync {
    fn call(&self, params: &JsonObject, context: &JsonObject, out: &OutputSink) -> Result<Value>;
}

impl<F> Handler for F
where
    F: Fn(&JsonObject, &JsonObject, &OutputSink) -> Result<Value> + Send + Sync,
{
    fn call(&self, params: &JsonObject, context: &JsonObject, out: &OutputSink) -> Result<Value> {
        self(params, context, out)
    }
}

type ModuleTable = HashMap<SymbolName, Arc<dyn Handler>>;

/// Registry of handlers compiled into the process, keyed by module and symbol.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    modules: HashMap<ModulePath, ModuleTable>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `module.symbol`.
    pub fn register(
        mut self,
        module: impl Into<ModulePath>,
        symbol: impl Into<SymbolName>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(symbol.into(), handler);
        self
    }

    /// Register a handler from a type that implements `Handler`.
    pub fn register_handler<T: Handler + 'static>(
        self,
        module: impl Into<ModulePath>,
        symbol: impl Into<SymbolName>,
        handler: T,
    ) -> Self {
        self.register(module, symbol, Arc::new(handler))
    }

    pub fn has_module(&self, module: &ModulePath) -> bool {
        self.modules.contains_key(module)
    }

    /// Look up a handler. `None` when either the module or symbol is absent.
    pub fn get(&self, module: &ModulePath, symbol: &SymbolName) -> Option<Arc<dyn Handler>> {
        self.modules.get(module)?.get(symbol).cloned()
    }

    /// List all registered references as `module.symbol`.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .iter()
            .flat_map(|(module, symbols)| {
                symbols.keys().map(move |symbol| format!("{}.{}", module, symbol))
            })
            .collect();
        names.sort();
        names
    }

    /// Return the number of registered handlers.
    pub fn len(&self) -> usize {
        self.modules.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
