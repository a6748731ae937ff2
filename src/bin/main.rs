use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use funcexec::{
    CONTEXT_ENV, DEFAULT_HOST, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT, ExecutorConfig,
    HandlerRegistry, parse_context,
};

#[derive(Parser)]
#[command(name = "funcexec")]
#[command(about = "Function executor: resolves and runs handlers over HTTP")]
struct Cli {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory to change into before serving
    working_directory: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// JSON object passed as context to every handler
    #[arg(long, env = CONTEXT_ENV, hide_env_values = true)]
    context: Option<String>,

    /// Fail invocations running longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<f64>,

    /// Maximum number of handler calls in flight (unbounded when omitted)
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Maximum accepted request body size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("funcexec=info".parse()?)
                .add_directive("tower_http=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let timeout = cli
        .timeout_secs
        .filter(|secs| *secs > 0.0)
        .map(Duration::try_from_secs_f64)
        .transpose()?;

    let config = ExecutorConfig {
        host: cli.host,
        port: cli.port,
        working_directory: cli.working_directory,
        context: parse_context(cli.context.as_deref())?,
        timeout,
        max_concurrency: cli.max_concurrency,
        max_body_bytes: cli.max_body_bytes,
    };

    info!(
        "Starting executor on {} (context keys: {}, timeout: {:?}, max concurrency: {:?})",
        config.bind_address(),
        config.context.len(),
        config.timeout,
        config.max_concurrency
    );

    funcexec::run(config, HandlerRegistry::new()).await
}
