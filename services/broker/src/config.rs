use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use stratus_reconcile::{StaleRecordAction, DEFAULT_SWEEP_INTERVAL};

use crate::store::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// `test` wires in-memory provider and platform fakes.
    pub environment: String,
    pub log_level: String,
    pub catalog_path: PathBuf,
    pub broker_name: String,
    pub resource_prefix: String,
    pub provider_url: Option<String>,
    pub provider_token: Option<String>,
    pub platform_api_url: Option<String>,
    pub platform_token: Option<String>,
    pub shared_pool_url: Option<String>,
    pub shared_pool_host: String,
    pub shared_pool_port: u16,
    pub provider_timeout: Duration,
    pub sweep_interval: Duration,
    pub stale_record_action: StaleRecordAction,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_vars(|key| std::env::var(key).ok())?;
        config.database = DbConfig::from_env();
        Ok(config)
    }

    /// Build from an arbitrary variable source. The record-store pool keeps
    /// its defaults; `from_env` fills it from the process environment.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = var("STRATUS_ENVIRONMENT").unwrap_or_else(|| "production".to_string());
        let log_level = var("STRATUS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let catalog_path = var("STRATUS_CATALOG_PATH")
            .unwrap_or_else(|| "catalog.toml".to_string())
            .into();
        let broker_name = var("STRATUS_BROKER_NAME").unwrap_or_else(|| "stratus".to_string());
        let resource_prefix =
            var("STRATUS_RESOURCE_PREFIX").unwrap_or_else(|| "stratus".to_string());

        let shared_pool_port = match var("STRATUS_SHARED_POOL_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid STRATUS_SHARED_POOL_PORT: {raw}"))?,
            None => 5432,
        };

        let stale_record_action = match var("STRATUS_STALE_RECORD_ACTION") {
            Some(raw) => raw.parse()?,
            None => StaleRecordAction::default(),
        };

        Ok(Self {
            environment,
            log_level,
            catalog_path,
            broker_name,
            resource_prefix,
            provider_url: var("STRATUS_PROVIDER_URL"),
            provider_token: var("STRATUS_PROVIDER_TOKEN"),
            platform_api_url: var("STRATUS_PLATFORM_API_URL"),
            platform_token: var("STRATUS_PLATFORM_TOKEN"),
            shared_pool_url: var("STRATUS_SHARED_POOL_URL"),
            shared_pool_host: var("STRATUS_SHARED_POOL_HOST")
                .unwrap_or_else(|| "localhost".to_string()),
            shared_pool_port,
            provider_timeout: secs(&var, "STRATUS_PROVIDER_TIMEOUT_SECS", 60)?,
            sweep_interval: secs(
                &var,
                "STRATUS_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL.as_secs(),
            )?,
            stale_record_action,
            database: DbConfig::default(),
        })
    }

    pub fn is_test(&self) -> bool {
        self.environment == "test"
    }
}

fn secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let secs = match var(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("invalid {key}: {raw}"))?,
        None => default,
    };
    if secs == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}
