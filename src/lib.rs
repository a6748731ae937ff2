// Core modules
mod config;
mod error;
mod types;
mod utils;

pub mod api;
pub mod capture;
pub mod executor;
pub mod handlers;
pub mod resolver;
pub mod server;

// Re-export key types and functions
pub use capture::{OutputSink, Stream, with_capture};
pub use config::{
    CONTEXT_ENV, DEFAULT_HOST, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT, ExecutorConfig,
    enter_working_directory, load_context_from_env, parse_context,
};
pub use error::{InvocationError, ResolveError, TransportError};
pub use executor::Executor;
pub use handlers::{Handler, HandlerRegistry};
pub use resolver::HandlerResolver;
pub use server::{ExecutorServer, start_http};
pub use types::{HandlerRef, InvocationRequest, InvocationResult, JsonObject, ModulePath, SymbolName};

use anyhow::Result;

/// Convenience function to create and run the executor until shutdown.
///
/// Changes into the configured working directory first, then serves with
/// the handlers in `registry` plus any native modules found under the
/// directories named by requests.
pub async fn run(config: ExecutorConfig, registry: HandlerRegistry) -> Result<()> {
    if let Some(dir) = &config.working_directory {
        let dir = enter_working_directory(dir)?;
        tracing::info!("Working directory set to {}", dir.display());
    }

    if registry.is_empty() {
        tracing::debug!("No built-in handlers registered");
    } else {
        tracing::info!("Built-in handlers: {}", registry.list_names().join(", "));
    }

    let server = ExecutorServer::new(&config, registry);
    start_http(server, &config.bind_address()).await
}
