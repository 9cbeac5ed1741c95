use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::ObserverError;
use crate::models::{Protocol, TokenDisplay};
use crate::observer::ObserverOptions;
use crate::sources::BlockConsistency;
use crate::utils::DEFAULT_SIGNIFICANT_DIGITS;

/// Where an observer gets its pool state from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// JSON-RPC reads over HTTP, repeated on an interval.
    RpcPoll,
    /// WebSocket log subscription, one snapshot per event.
    RpcSubscribe,
    /// GraphQL subgraph query, repeated on an interval.
    IndexerQuery,
}

/// Optional on-chain quote taken in every V3 polling tick.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct QuoteSettings {
    /// QuoterV1 contract address.
    pub quoter: String,
    /// Amount of token0, in base units, as a decimal string.
    pub amount_in: String,
}

/// One observed pool.
#[derive(Debug, Deserialize, Clone)]
pub struct ObserverSettings {
    pub name: String,
    pub source: SourceKind,
    /// RPC/WebSocket/subgraph URL. May be omitted when `endpoint_env` is set.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of an environment variable holding the endpoint, so API keys stay out of files.
    #[serde(default)]
    pub endpoint_env: Option<String>,
    /// Pool contract address or subgraph pool id.
    pub pool: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default = "default_interval")]
    pub interval_milliseconds: u64,
    #[serde(default)]
    pub token0: TokenDisplay,
    #[serde(default)]
    pub token1: TokenDisplay,
    #[serde(default = "default_significant_digits")]
    pub significant_digits: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_milliseconds: u64,
    #[serde(default)]
    pub block_consistency: BlockConsistency,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_milliseconds: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_milliseconds: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default)]
    pub quote: Option<QuoteSettings>,
}

fn default_protocol() -> Protocol {
    Protocol::V2
}

fn default_interval() -> u64 {
    10_000 // same as ethers' default provider polling interval
}

fn default_significant_digits() -> u64 {
    DEFAULT_SIGNIFICANT_DIGITS
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl ObserverSettings {
    /// The endpoint URL, taken from `endpoint_env` first, then `endpoint`.
    pub fn resolved_endpoint(&self) -> Result<String, ObserverError> {
        if let Some(var) = &self.endpoint_env {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }
        self.endpoint.clone().ok_or_else(|| {
            ObserverError::Config(format!(
                "observer {} has no endpoint (set `endpoint` or `endpoint_env`)",
                self.name
            ))
        })
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_milliseconds)
    }

    pub fn options(&self) -> ObserverOptions {
        ObserverOptions {
            interval: Duration::from_millis(self.interval_milliseconds),
            significant_digits: self.significant_digits,
            backoff_base: Duration::from_millis(self.backoff_base_milliseconds),
            backoff_max: Duration::from_millis(self.backoff_max_milliseconds),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

/// Logger configuration for the daemon.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Redpanda (Kafka-compatible) price publishing.
///
/// When enabled, every price update of every observer is published as JSON to
/// `{topic_prefix}.prices`, keyed by pool id.
#[derive(Debug, Deserialize, Clone)]
pub struct RedpandaSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[serde(default = "default_redpanda_brokers")]
    pub brokers: String,
    #[serde(default = "default_redpanda_topic_prefix")]
    pub topic_prefix: String,
}

fn default_redpanda_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_redpanda_topic_prefix() -> String {
    "poolwatch".to_string()
}

/// Root application configuration, loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,
    pub observers: Vec<ObserverSettings>,
    #[serde(default)]
    pub redpanda: Option<RedpandaSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("config")
    }

    /// Load from `path` (extension optional), with `POOLWATCH__SECTION__KEY` overrides.
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("POOLWATCH").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
