use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Service configuration loaded from environment variables.
/// The model catalog itself lives in a YAML file named by `CATALOG_PATH`.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub port: u16,
    pub rust_log: String,
    pub engine: EngineSettings,
}

/// How the service launches and talks to the vLLM engine process.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub vllm_bin: String,
    pub host: String,
    pub port: u16,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vllm_bin: "vllm".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8100,
            startup_timeout: Duration::from_secs(900),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = EngineSettings::default();

        Ok(Config {
            catalog_path: PathBuf::from(require_env("CATALOG_PATH")?),
            port: parse_env("PORT", 8001u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            engine: EngineSettings {
                vllm_bin: std::env::var("VLLM_BIN").unwrap_or(defaults.vllm_bin),
                host: std::env::var("ENGINE_HOST").unwrap_or(defaults.host),
                port: parse_env("ENGINE_PORT", defaults.port)?,
                startup_timeout: Duration::from_secs(parse_env(
                    "ENGINE_STARTUP_TIMEOUT_SECS",
                    defaults.startup_timeout.as_secs(),
                )?),
                request_timeout: Duration::from_secs(parse_env(
                    "ENGINE_REQUEST_TIMEOUT_SECS",
                    defaults.request_timeout.as_secs(),
                )?),
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
