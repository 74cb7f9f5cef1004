use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_ACCRUAL_ADDRESS: &str = "http://localhost:3000";
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub accrual_address: String,
    pub accrual_workers: usize,
    pub accrual_poll_interval_secs: u64,
    pub accrual_batch_size: i64,
    pub accrual_request_timeout_secs: u64,
    pub log_format: LogFormat,
}

/// Settings the order-accrual pipeline is constructed with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let database_url = env::var("DATABASE_URI")
            .or_else(|_| env::var("DATABASE_URL"))
            .context("DATABASE_URI must be set")?;

        let config = Config {
            server_port: parse_var("SERVER_PORT", 8000)?,
            database_url,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            accrual_address: normalize_address(
                &env::var("ACCRUAL_SYSTEM_ADDRESS")
                    .unwrap_or_else(|_| DEFAULT_ACCRUAL_ADDRESS.to_string()),
            ),
            accrual_workers: parse_var("ACCRUAL_WORKERS", DEFAULT_WORKERS)?,
            accrual_poll_interval_secs: parse_var(
                "ACCRUAL_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?,
            accrual_batch_size: parse_var("ACCRUAL_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            accrual_request_timeout_secs: parse_var(
                "ACCRUAL_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            log_format: parse_log_format(
                &env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URI is empty");
        }
        if self.accrual_workers == 0 {
            anyhow::bail!("ACCRUAL_WORKERS must be greater than 0");
        }
        if self.accrual_poll_interval_secs == 0 {
            anyhow::bail!("ACCRUAL_POLL_INTERVAL_SECS must be greater than 0");
        }
        if self.accrual_batch_size <= 0 {
            anyhow::bail!("ACCRUAL_BATCH_SIZE must be greater than 0");
        }
        if self.accrual_request_timeout_secs == 0 {
            anyhow::bail!("ACCRUAL_REQUEST_TIMEOUT_SECS must be greater than 0");
        }
        url::Url::parse(&self.accrual_address)
            .context("ACCRUAL_SYSTEM_ADDRESS is not a valid URL")?;
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.accrual_workers,
            poll_interval: Duration::from_secs(self.accrual_poll_interval_secs),
            batch_size: self.accrual_batch_size,
        }
    }

    pub fn accrual_timeout(&self) -> Duration {
        Duration::from_secs(self.accrual_request_timeout_secs)
    }
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}

/// The accrual address is commonly given as `host:port`.
fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
