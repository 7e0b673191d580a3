use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub backend_url: String,

    pub accounts_poll_ms: u64,
    /// 0 turns bot status polling off.
    pub status_poll_ms: u64,

    pub log_level: String,
    pub log_format: LogFormat,

    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let log_format = match get("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            backend_url: get("BACKEND_WS_URL", "ws://localhost:8765"),

            accounts_poll_ms: parse_num("ACCOUNTS_POLL_MS", &get("ACCOUNTS_POLL_MS", "20000"))?,
            status_poll_ms: parse_num("STATUS_POLL_MS", &get("STATUS_POLL_MS", "500"))?,

            log_level: get("LOG_LEVEL", "info"),
            log_format,

            http_port: parse_num("HTTP_PORT", &get("HTTP_PORT", "3000"))?,
        })
    }

    pub fn accounts_every(&self) -> Duration {
        Duration::from_millis(self.accounts_poll_ms)
    }

    pub fn status_every(&self) -> Option<Duration> {
        (self.status_poll_ms > 0).then(|| Duration::from_millis(self.status_poll_ms))
    }
}

fn parse_num<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid number for {key}: {raw}"))
}
