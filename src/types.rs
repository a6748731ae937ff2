//! Wire types and NewType wrappers for the executor.
//!
//! Request and response envelopes use PascalCase field names on the wire,
//! matching what the invoking node sends and expects back.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ResolveError;

/// A JSON object as passed to handlers for both params and context.
pub type JsonObject = serde_json::Map<String, Value>;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Dotted module path of a handler (e.g., "function" or "pkg.function").
    ///
    /// Each segment maps to one directory level below a search root, with
    /// the last segment naming the shared library file.
    ModulePath
);

newtype_string!(
    /// Name of the callable exported by a module (e.g., "handler").
    SymbolName
);

impl ModulePath {
    /// Split the module path into its dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

/// A parsed `<module-path>.<symbol>` handler reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    pub module: ModulePath,
    pub symbol: SymbolName,
}

impl HandlerRef {
    /// Parse a reference, splitting at the last dot.
    ///
    /// Module segments must be non-empty and may not contain path separators
    /// or parent-directory components, so a reference can never name a file
    /// outside the registered search roots.
    pub fn parse(reference: &str) -> Result<Self, ResolveError> {
        let malformed = || ResolveError::MalformedReference(reference.to_string());

        let (module, symbol) = reference.rsplit_once('.').ok_or_else(malformed)?;
        if module.is_empty() || symbol.is_empty() {
            return Err(malformed());
        }

        let valid_segment = |segment: &str| {
            !segment.is_empty()
                && segment != ".."
                && !segment.contains('/')
                && !segment.contains('\\')
        };
        if !module.split('.').all(valid_segment) || !valid_segment(symbol) {
            return Err(malformed());
        }

        Ok(Self {
            module: ModulePath::new(module),
            symbol: SymbolName::new(symbol),
        })
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.symbol)
    }
}

/// Body of an `invoke` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationRequest {
    /// `<module-path>.<symbol>` of the handler to call.
    pub handler: String,
    /// Directory to register as a search root before resolving.
    pub handler_dir: String,
    /// Caller parameters; absent or `null` means an empty object.
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: JsonObject,
    /// Whether text the handler emits is returned in `Output`.
    pub return_output: bool,
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<JsonObject, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<JsonObject>::deserialize(deserializer)?.unwrap_or_default())
}

/// Envelope returned for every request the engine handled.
///
/// `result` is set only on success and holds the handler's return value
/// already encoded as a JSON string; callers decode it a second time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationResult {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvocationResult {
    pub fn success(result: String, output: String) -> Self {
        Self {
            output,
            result: Some(result),
            success: true,
            error: None,
        }
    }

    /// Failed outcome. Any output captured before the failure is dropped.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            result: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handler_ref_splits_at_last_dot() {
        let parsed = HandlerRef::parse("pkg.function.handler").unwrap();
        assert_eq!(parsed.module.as_str(), "pkg.function");
        assert_eq!(parsed.symbol.as_str(), "handler");
        assert_eq!(parsed.to_string(), "pkg.function.handler");
        assert_eq!(
            parsed.module.segments().collect::<Vec<_>>(),
            vec!["pkg", "function"]
        );
    }

    #[test]
    fn test_handler_ref_rejects_malformed() {
        for bad in ["handler", "", ".handler", "function.", "a..b", "../x.h", "a/b.h"] {
            let err = HandlerRef::parse(bad).unwrap_err();
            assert!(
                matches!(err, ResolveError::MalformedReference(ref r) if r == bad),
                "expected malformed reference for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_module_path_newtype() {
        let module = ModulePath::new("function");
        assert_eq!(module.as_str(), "function");
        assert_eq!(module.clone().into_inner(), "function");
        let symbol: SymbolName = "handler".into();
        assert_eq!(symbol.to_string(), "handler");
    }

    #[test]
    fn test_request_params_default_to_empty() {
        let request: InvocationRequest = serde_json::from_value(json!({
            "Handler": "function.handler",
            "HandlerDir": "/app",
            "ReturnOutput": true
        }))
        .unwrap();
        assert!(request.params.is_empty());
        assert!(request.return_output);

        let request: InvocationRequest = serde_json::from_value(json!({
            "Handler": "function.handler",
            "HandlerDir": "/app",
            "Params": null,
            "ReturnOutput": false
        }))
        .unwrap();
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_request_requires_handler_fields() {
        let missing_dir = serde_json::from_value::<InvocationRequest>(json!({
            "Handler": "function.handler",
            "ReturnOutput": true
        }));
        assert!(missing_dir.is_err());

        let missing_flag = serde_json::from_value::<InvocationRequest>(json!({
            "Handler": "function.handler",
            "HandlerDir": "/app"
        }));
        assert!(missing_flag.is_err());
    }

    #[test]
    fn test_result_envelope_shape() {
        let ok = InvocationResult::success("42".to_string(), "hi\n\n".to_string());
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"Output":"hi\n\n","Result":"42","Success":true}"#
        );

        let failed = InvocationResult::failure("boom");
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"Output":"","Success":false,"Error":"boom"}"#
        );
    }
}
