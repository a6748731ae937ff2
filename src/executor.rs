use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::capture::with_capture;
use crate::error::InvocationError;
use crate::resolver::HandlerResolver;
use crate::types::{InvocationRequest, InvocationResult, JsonObject};
use crate::utils::{encode_result, panic_message};

/// Runs invocation requests against handlers from a shared resolver.
///
/// Every failure, from a malformed reference to a handler panic, comes back
/// as a `Success=false` result; `invoke` itself never fails.
pub struct Executor {
    resolver: Arc<HandlerResolver>,
    timeout: Option<Duration>,
    permits: Option<Arc<Semaphore>>,
}

impl Executor {
    pub fn new(resolver: Arc<HandlerResolver>) -> Self {
        Self {
            resolver,
            timeout: None,
            permits: None,
        }
    }

    /// Fail invocations that take longer than `timeout`, counting any wait
    /// for a concurrency permit.
    ///
    /// The handler's thread cannot be interrupted; it keeps running in the
    /// background and its result is dropped.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allow at most `limit` handler calls in flight; others wait.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.permits = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    pub fn resolver(&self) -> &Arc<HandlerResolver> {
        &self.resolver
    }

    /// Resolve and call the requested handler.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        context: Arc<JsonObject>,
    ) -> InvocationResult {
        let span = info_span!(
            "invoke",
            id = %Uuid::new_v4(),
            handler = %request.handler,
            dir = %request.handler_dir,
        );

        async move {
            let started = Instant::now();
            match self.run(request, context).await {
                Ok((result, output)) => {
                    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Invocation succeeded");
                    InvocationResult::success(result, output)
                }
                Err(err) => {
                    warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "Invocation failed"
                    );
                    InvocationResult::failure(err.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Waiting for a concurrency permit counts against the timeout.
    async fn run(
        &self,
        request: InvocationRequest,
        context: Arc<JsonObject>,
    ) -> Result<(String, String), InvocationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(request, context))
                .await
                .map_err(|_| InvocationError::TimedOut(limit))?,
            None => self.dispatch(request, context).await,
        }
    }

    async fn dispatch(
        &self,
        request: InvocationRequest,
        context: Arc<JsonObject>,
    ) -> Result<(String, String), InvocationError> {
        let permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| InvocationError::Unavailable(e.to_string()))?,
            ),
            None => None,
        };

        let resolver = self.resolver.clone();
        let task = tokio::task::spawn_blocking(move || {
            // Held until the handler really returns, even past a timeout.
            let _permit = permit;
            execute(&resolver, &request, &context)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(InvocationError::Panicked(panic_message(
                e.into_panic().as_ref(),
            ))),
            Err(e) => Err(InvocationError::Unavailable(e.to_string())),
        }
    }
}

/// Resolve and call a handler on the current thread.
///
/// Returns the encoded result and captured output. Output captured before a
/// handler error is discarded along with the result.
pub fn execute(
    resolver: &HandlerResolver,
    request: &InvocationRequest,
    context: &JsonObject,
) -> Result<(String, String), InvocationError> {
    let handler = resolver.resolve(&request.handler, &request.handler_dir)?;

    let (outcome, output) = with_capture(request.return_output, |sink| {
        handler.call(&request.params, context, sink)
    });
    let value = outcome.map_err(|e| InvocationError::handler(format!("{:#}", e)))?;

    let encoded = encode_result(&value)
        .map_err(|e| InvocationError::Handler(format!("result is not serializable: {}", e)))?;
    Ok((encoded, output))
}
