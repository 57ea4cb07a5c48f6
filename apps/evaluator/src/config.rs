use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_POLL_INTERVAL_MS: u64 = 2500;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 90;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_FILE: &str = ".evaluator-session.json";

/// Client configuration loaded from environment variables.
/// Fails at startup if `API_BASE_URL` is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub request_timeout: Duration,
    pub session_file: PathBuf,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            api_base_url: require_env("API_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            poll_interval: Duration::from_millis(parse_positive_env(
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            poll_timeout: Duration::from_secs(parse_positive_env(
                "POLL_TIMEOUT_SECS",
                DEFAULT_POLL_TIMEOUT_SECS,
            )?),
            request_timeout: Duration::from_secs(parse_env(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            session_file: std::env::var("SESSION_FILE")
                .unwrap_or_else(|_| DEFAULT_SESSION_FILE.to_string())
                .into(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Like `parse_env`, but zero is rejected too.
fn parse_positive_env(key: &str, default: u64) -> Result<u64> {
    let value = parse_env(key, default)?;
    if value == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}
