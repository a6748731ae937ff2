use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, anyhow};
use serde_json::Value;

use crate::types::JsonObject;

/// Environment variable holding the invocation context JSON object.
pub const CONTEXT_ENV: &str = "CONTEXT";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Process-level settings for the executor server.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub host: String,
    pub port: u16,
    /// Directory to change into before serving.
    pub working_directory: Option<PathBuf>,
    /// Context handed to every handler call.
    pub context: JsonObject,
    pub timeout: Option<Duration>,
    pub max_concurrency: Option<usize>,
    pub max_body_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            working_directory: None,
            context: JsonObject::new(),
            timeout: None,
            max_concurrency: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ExecutorConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse the invocation context.
///
/// An absent or blank value yields an empty object; anything other than a
/// JSON object is rejected.
pub fn parse_context(raw: Option<&str>) -> anyhow::Result<JsonObject> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(JsonObject::new());
    };

    match serde_json::from_str::<Value>(raw).context("Invocation context is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "Invocation context must be a JSON object, got {}",
            json_kind(&other)
        )),
    }
}

/// Read and parse the context from `CONTEXT`.
pub fn load_context_from_env() -> anyhow::Result<JsonObject> {
    parse_context(env::var(CONTEXT_ENV).ok().as_deref())
}

/// Change the process working directory.
pub fn enter_working_directory(dir: &Path) -> anyhow::Result<PathBuf> {
    env::set_current_dir(dir)
        .with_context(|| format!("Failed to change into working directory {}", dir.display()))?;
    Ok(fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
