//! HTTP server for the executor.
//!
//! Wires the process-scoped resolver, executor and context into the axum
//! router and runs it until a shutdown signal arrives.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;

use crate::api::{AppState, create_router};
use crate::config::ExecutorConfig;
use crate::executor::Executor;
use crate::handlers::HandlerRegistry;
use crate::resolver::HandlerResolver;

/// Executor server state, built once at startup.
#[derive(Clone)]
pub struct ExecutorServer {
    state: AppState,
}

impl ExecutorServer {
    /// Create a server with built-in handlers from `registry`.
    pub fn new(config: &ExecutorConfig, registry: HandlerRegistry) -> Self {
        let resolver = Arc::new(HandlerResolver::new(registry));
        let executor = Executor::new(resolver)
            .with_timeout(config.timeout)
            .with_max_concurrency(config.max_concurrency);

        Self {
            state: AppState {
                executor: Arc::new(executor),
                context: Arc::new(config.context.clone()),
                max_body_bytes: config.max_body_bytes,
            },
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.state.executor
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight
    /// requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Bind `bind` and serve until ctrl-c or SIGTERM.
pub async fn start_http(server: ExecutorServer, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!("Serving HTTP traffic on http://{}", listener.local_addr()?);

    server.serve(listener, shutdown_signal()).await?;

    tracing::info!("Shutting down server per user request");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::OutputSink;
    use crate::types::{InvocationResult, JsonObject};
    use reqwest::StatusCode;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use tokio::sync::oneshot;

    fn marker(params: &JsonObject, _: &JsonObject, out: &OutputSink) -> anyhow::Result<Value> {
        let marker = params.get("marker").and_then(Value::as_str).unwrap_or_default();
        out.print(marker);
        out.eprint(marker);
        Ok(json!({"Marker": marker}))
    }

    fn region(_: &JsonObject, context: &JsonObject, _: &OutputSink) -> anyhow::Result<Value> {
        context
            .get("region")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no region in context"))
    }

    fn sleeper(params: &JsonObject, _: &JsonObject, out: &OutputSink) -> anyhow::Result<Value> {
        let seconds = params.get("sleep_duration").and_then(Value::as_u64).unwrap_or(5);
        out.println(format!("Pausing for {} seconds...", seconds));
        std::thread::sleep(std::time::Duration::from_secs(seconds));
        Ok(json!({"Success": true, "Message": format!("Slept for {} seconds", seconds)}))
    }

    struct TestServer {
        addr: SocketAddr,
        shutdown: Option<oneshot::Sender<()>>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    impl TestServer {
        async fn start(config: ExecutorConfig) -> Self {
            let registry = HandlerRegistry::new()
                .register_handler("function", "marker", marker)
                .register_handler("function", "region", region)
                .register_handler("function", "handler", sleeper);
            let server = ExecutorServer::new(&config, registry);

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (tx, rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(server.serve(listener, async move {
                let _ = rx.await;
            }));

            Self {
                addr,
                shutdown: Some(tx),
                handle,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        async fn stop(mut self) {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
            self.handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invoke_example_over_http() {
        let server = TestServer::start(ExecutorConfig::default()).await;
        let response = reqwest::Client::new()
            .post(server.url("/invoke"))
            .json(&json!({
                "Handler": "function.handler",
                "HandlerDir": "/app",
                "Params": {"sleep_duration": 1},
                "ReturnOutput": true
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({
                "Success": true,
                "Result": "{\"Success\": true, \"Message\": \"Slept for 1 seconds\"}",
                "Output": "Pausing for 1 seconds...\n\n"
            })
        );

        let inner: Value = serde_json::from_str(body["Result"].as_str().unwrap()).unwrap();
        assert_eq!(inner["Message"], "Slept for 1 seconds");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_method_are_404() {
        let server = TestServer::start(ExecutorConfig::default()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(server.url("/status"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.bytes().await.unwrap().is_empty());

        let response = client.get(server.url("/invoke")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.bytes().await.unwrap().is_empty());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_path_only_needs_to_contain_invoke() {
        let server = TestServer::start(ExecutorConfig::default()).await;
        let response = reqwest::Client::new()
            .post(server.url("/function/invoke/marker"))
            .json(&json!({
                "Handler": "function.marker",
                "HandlerDir": "/app",
                "ReturnOutput": false
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: InvocationResult = response.json().await.unwrap();
        assert!(body.success);
        assert_eq!(body.output, "");
        assert_eq!(body.result.as_deref(), Some(r#"{"Marker": ""}"#));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_missing_required_field_is_400() {
        let server = TestServer::start(ExecutorConfig::default()).await;
        let response = reqwest::Client::new()
            .post(server.url("/invoke"))
            .json(&json!({"Handler": "function.marker", "ReturnOutput": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.bytes().await.unwrap().is_empty());

        let response = reqwest::Client::new()
            .post(server.url("/invoke"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let config = ExecutorConfig {
            max_body_bytes: 16,
            ..Default::default()
        };
        let server = TestServer::start(config).await;
        let response = reqwest::Client::new()
            .post(server.url("/invoke"))
            .body("x".repeat(64))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_failures_are_200_envelopes() {
        let server = TestServer::start(ExecutorConfig::default()).await;
        let client = reqwest::Client::new();

        for handler in ["missing.handler", "function.nope", "function.region"] {
            let response = client
                .post(server.url("/invoke"))
                .json(&json!({
                    "Handler": handler,
                    "HandlerDir": "/app",
                    "ReturnOutput": true
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body: Value = response.json().await.unwrap();
            assert_eq!(body["Success"], false);
            assert!(!body["Error"].as_str().unwrap().is_empty());
            assert!(body.get("Result").is_none());
            assert_eq!(body["Output"], "");
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_context_reaches_handlers() {
        let config = ExecutorConfig {
            context: json!({"region": "edge-1"}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        let server = TestServer::start(config).await;
        let body: InvocationResult = reqwest::Client::new()
            .post(server.url("/invoke"))
            .json(&json!({
                "Handler": "function.region",
                "HandlerDir": "/app",
                "ReturnOutput": false
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(body.success);
        assert_eq!(body.result.as_deref(), Some(r#""edge-1""#));
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_requests_get_their_own_output() {
        let server = TestServer::start(ExecutorConfig::default()).await;
        let client = reqwest::Client::new();

        let requests: Vec<_> = (0..50)
            .map(|i| {
                let client = client.clone();
                let url = server.url("/invoke");
                tokio::spawn(async move {
                    let marker = format!("call-{i}");
                    let body: InvocationResult = client
                        .post(url)
                        .json(&json!({
                            "Handler": "function.marker",
                            "HandlerDir": "/app",
                            "Params": {"marker": marker.clone()},
                            "ReturnOutput": true
                        }))
                        .send()
                        .await
                        .unwrap()
                        .json()
                        .await
                        .unwrap();
                    (marker, body)
                })
            })
            .collect();

        for request in requests {
            let (marker, body) = request.await.unwrap();
            assert!(body.success);
            assert_eq!(body.output, format!("{marker}\n{marker}"));
        }
        server.stop().await;
    }
}
