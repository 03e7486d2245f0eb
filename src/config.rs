use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::entities::RetryPolicy;
use crate::infrastructure::persistence::QueueConfig;
use crate::infrastructure::workers::ProcessorConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub otel_exporter_endpoint: Option<String>,
    pub service_name: String,
    pub metrics_port: u16,
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
    pub task_timeout_secs: u64,
    pub visibility_timeout_secs: u64,
    pub recovery_interval_secs: u64,
    pub promotion_interval_secs: u64,
    pub promotion_batch_size: u32,
    pub recovery_batch_size: u32,
    pub telegram_api_base: String,
    pub telegram_max_retry_attempts: u32,
    pub telegram_retry_base_secs: u64,
    pub telegram_retry_multiplier: f64,
    pub telegram_retry_max_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://notesync.db?mode=rwc".to_string());

        let otel_exporter_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty());

        let service_name = lookup("SERVICE_NAME").unwrap_or_else(|| "notesync".to_string());

        let metrics_port = parse_var(&lookup, "METRICS_PORT", 9000)?;

        let max_concurrent_tasks: usize = parse_var(&lookup, "SYNC_MAX_CONCURRENT_TASKS", 4)?;
        if max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue("SYNC_MAX_CONCURRENT_TASKS".to_string()));
        }

        let telegram_retry_multiplier: f64 = parse_var(&lookup, "TELEGRAM_RETRY_MULTIPLIER", 2.0)?;
        if !telegram_retry_multiplier.is_finite() || telegram_retry_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue("TELEGRAM_RETRY_MULTIPLIER".to_string()));
        }

        // A task must time out before its lease does, or recovery races a live handler
        let task_timeout_secs: u64 = parse_var(&lookup, "SYNC_TASK_TIMEOUT_SECS", 60)?;
        let visibility_timeout_secs: u64 = parse_var(&lookup, "SYNC_VISIBILITY_TIMEOUT_SECS", 300)?;
        if task_timeout_secs >= visibility_timeout_secs {
            return Err(ConfigError::InvalidValue("SYNC_TASK_TIMEOUT_SECS".to_string()));
        }

        Ok(Config {
            database_url,
            otel_exporter_endpoint,
            service_name,
            metrics_port,
            max_concurrent_tasks,
            poll_interval_ms: parse_var(&lookup, "SYNC_POLL_INTERVAL_MS", 1000)?,
            task_timeout_secs,
            visibility_timeout_secs,
            recovery_interval_secs: parse_var(&lookup, "SYNC_RECOVERY_INTERVAL_SECS", 60)?,
            promotion_interval_secs: parse_var(&lookup, "SYNC_PROMOTION_INTERVAL_SECS", 30)?,
            promotion_batch_size: parse_var(&lookup, "SYNC_PROMOTION_BATCH_SIZE", 100)?,
            recovery_batch_size: parse_var(&lookup, "SYNC_RECOVERY_BATCH_SIZE", 100)?,
            telegram_api_base: lookup("TELEGRAM_API_BASE")
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            telegram_max_retry_attempts: parse_var(&lookup, "TELEGRAM_MAX_RETRY_ATTEMPTS", 3)?,
            telegram_retry_base_secs: parse_var(&lookup, "TELEGRAM_RETRY_BASE_SECS", 60)?,
            telegram_retry_multiplier,
            telegram_retry_max_secs: parse_var(&lookup, "TELEGRAM_RETRY_MAX_SECS", 1800)?,
        })
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            promotion_interval: Duration::from_secs(self.promotion_interval_secs),
            promotion_batch_size: self.promotion_batch_size,
            recovery_batch_size: self.recovery_batch_size,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            recovery_interval: Duration::from_secs(self.recovery_interval_secs),
            ..ProcessorConfig::default()
        }
    }

    pub fn telegram_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.telegram_max_retry_attempts,
            Duration::from_secs(self.telegram_retry_base_secs),
            self.telegram_retry_multiplier,
            Duration::from_secs(self.telegram_retry_max_secs),
        )
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}
