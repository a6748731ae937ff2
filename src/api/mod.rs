// HTTP surface of the executor

use axum::{
    Router,
    extract::{Request, State},
    http::{Method, StatusCode, header::CONTENT_LENGTH},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::TransportError;
use crate::executor::Executor;
use crate::types::{InvocationRequest, JsonObject};

/// Shared state of the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub context: Arc<JsonObject>,
    pub max_body_bytes: usize,
}

/// Router with a single catch-all handler.
///
/// Matching is done by hand: any `POST` whose path contains `invoke` is an
/// invocation, everything else is a 404.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn handle_request(State(state): State<AppState>, request: Request) -> Response {
    match read_invocation(&state, request).await {
        Ok(invocation) => {
            let result = state
                .executor
                .invoke(invocation, state.context.clone())
                .await;
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(TransportError::NotFound) => TransportError::NotFound.into_response(),
        Err(err) => {
            warn!("Rejected request: {}", err);
            err.into_response()
        }
    }
}

/// Validate method, path and body, and decode the invocation request.
async fn read_invocation(
    state: &AppState,
    request: Request,
) -> Result<InvocationRequest, TransportError> {
    if request.method() != Method::POST || !request.uri().path().contains("invoke") {
        return Err(TransportError::NotFound);
    }

    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<usize>().ok())
        .ok_or(TransportError::LengthRequired)?;

    if declared > state.max_body_bytes {
        return Err(TransportError::PayloadTooLarge {
            declared,
            limit: state.max_body_bytes,
        });
    }

    let body = axum::body::to_bytes(request.into_body(), declared)
        .await
        .map_err(|e| TransportError::BadBody(e.to_string()))?;
    if body.len() != declared {
        return Err(TransportError::BadBody(format!(
            "expected {} bytes, got {}",
            declared,
            body.len()
        )));
    }

    serde_json::from_slice(&body).map_err(|e| TransportError::MalformedRequest(e.to_string()))
}
