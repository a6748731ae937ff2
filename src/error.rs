//! Error types for handler resolution, invocation and request transport.
//!
//! Resolution and invocation errors never leave the executor as HTTP errors:
//! they are folded into a failed `InvocationResult`. Transport errors are
//! answered directly with a non-200 status and an empty body.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors raised while turning a handler reference into a callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The reference has no `<module>.<symbol>` shape.
    MalformedReference(String),

    /// No search root or built-in table provides the module.
    ModuleNotFound {
        module: String,
        searched: Vec<PathBuf>,
    },

    /// A library file for the module exists but could not be opened.
    ModuleLoad {
        module: String,
        path: PathBuf,
        message: String,
    },

    /// The module was found but does not export the symbol.
    SymbolNotFound { module: String, symbol: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedReference(reference) => write!(
                f,
                "Malformed handler reference '{}': expected <module>.<symbol>",
                reference
            ),
            Self::ModuleNotFound { module, .. } => write!(f, "No module named '{}'", module),
            Self::ModuleLoad {
                module,
                path,
                message,
            } => write!(
                f,
                "Failed to load module '{}' from {}: {}",
                module,
                path.display(),
                message
            ),
            Self::SymbolNotFound { module, symbol } => {
                write!(f, "Module '{}' has no symbol '{}'", module, symbol)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Errors that turn an invocation into a `Success=false` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    Resolve(ResolveError),

    /// The handler returned an error; carries its message.
    Handler(String),

    /// The handler panicked.
    Panicked(String),

    /// The handler did not finish within the configured deadline.
    TimedOut(Duration),

    /// The executor could not schedule the call.
    Unavailable(String),
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve(err) => write!(f, "{}", err),
            Self::Handler(msg) => write!(f, "{}", msg),
            Self::Panicked(msg) => write!(f, "handler panicked: {}", msg),
            Self::TimedOut(after) => {
                write!(f, "handler timed out after {}s", after.as_secs_f64())
            }
            Self::Unavailable(msg) => write!(f, "executor unavailable: {}", msg),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolve(err) => Some(err),
            _ => None,
        }
    }
}

impl InvocationError {
    /// A handler failure. Blank messages become `handler failed` so a failed
    /// result always carries some error text.
    pub fn handler(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Handler("handler failed".to_string())
        } else {
            Self::Handler(message)
        }
    }
}

impl From<ResolveError> for InvocationError {
    fn from(err: ResolveError) -> Self {
        Self::Resolve(err)
    }
}

/// Structurally invalid requests, answered without an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Wrong method or a path without `invoke`.
    NotFound,

    /// `Content-Length` missing or not a number.
    LengthRequired,

    /// Declared body exceeds the configured limit.
    PayloadTooLarge { declared: usize, limit: usize },

    /// Body shorter than declared or unreadable.
    BadBody(String),

    /// Body is not a valid invocation request.
    MalformedRequest(String),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadBody(_) | Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Not found"),
            Self::LengthRequired => write!(f, "Content-Length header required"),
            Self::PayloadTooLarge { declared, limit } => write!(
                f,
                "Request body of {} bytes exceeds limit of {} bytes",
                declared, limit
            ),
            Self::BadBody(msg) => write!(f, "Failed to read request body: {}", msg),
            Self::MalformedRequest(msg) => write!(f, "Malformed invocation request: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        assert_eq!(
            ResolveError::MalformedReference("handler".to_string()).to_string(),
            "Malformed handler reference 'handler': expected <module>.<symbol>"
        );
        assert_eq!(
            ResolveError::ModuleNotFound {
                module: "function".to_string(),
                searched: vec![PathBuf::from("/app")],
            }
            .to_string(),
            "No module named 'function'"
        );
        assert_eq!(
            ResolveError::SymbolNotFound {
                module: "function".to_string(),
                symbol: "missing".to_string(),
            }
            .to_string(),
            "Module 'function' has no symbol 'missing'"
        );
    }

    #[test]
    fn test_blank_handler_message_gets_fallback() {
        assert_eq!(
            InvocationError::handler(""),
            InvocationError::Handler("handler failed".to_string())
        );
        assert_eq!(InvocationError::handler(" \n").to_string(), "handler failed");
        assert_eq!(InvocationError::handler("bad input").to_string(), "bad input");
    }

    #[test]
    fn test_invocation_error_display() {
        assert_eq!(
            InvocationError::Handler("division by zero".to_string()).to_string(),
            "division by zero"
        );
        assert_eq!(
            InvocationError::Panicked("oops".to_string()).to_string(),
            "handler panicked: oops"
        );
        assert_eq!(
            InvocationError::TimedOut(Duration::from_secs(2)).to_string(),
            "handler timed out after 2s"
        );
        let wrapped: InvocationError = ResolveError::MalformedReference("x".to_string()).into();
        assert!(std::error::Error::source(&wrapped).is_some());
    }

    #[test]
    fn test_transport_error_status() {
        assert_eq!(TransportError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            TransportError::LengthRequired.status(),
            StatusCode::LENGTH_REQUIRED
        );
        assert_eq!(
            TransportError::PayloadTooLarge {
                declared: 10,
                limit: 5
            }
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            TransportError::MalformedRequest("missing field".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
