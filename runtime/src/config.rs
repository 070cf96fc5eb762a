//! Configuration management for the event pipeline.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike a missing variable, a variable that is set but cannot be parsed is
//! an error.

use crate::retry::{RetryPolicy, WaitPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value does not parse
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        /// Environment variable name
        name: String,
        /// Raw value found
        value: String,
        /// Parser message
        reason: String,
    },
}

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Outbound publisher settings
    pub publisher: PublisherConfig,
    /// Inbound consumer settings
    pub consumer: ConsumerConfig,
    /// Completion wait settings
    pub wait: WaitConfig,
    /// Logging and metrics settings
    pub telemetry: TelemetryConfig,
}

/// Outbound publisher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Broker retries after the first failed attempt (default: 3)
    pub max_retries: usize,
    /// Delay before the first retry in milliseconds (default: 100)
    pub initial_delay_ms: u64,
    /// Cap on the retry delay in milliseconds (default: 5000)
    pub max_delay_ms: u64,
    /// Randomize retry delays (default: true)
    pub jitter: bool,
}

/// Inbound consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group name (default: `booking-pipeline`)
    pub group: String,
    /// Deliveries after which a retryable failure becomes poison (default: 5)
    pub max_redeliveries: u32,
}

/// Completion wait configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Timeout for a publication wait in milliseconds (default: 5000)
    pub publish_wait_ms: u64,
    /// Timeout for a consumption wait in milliseconds (default: 10000)
    pub consume_wait_ms: u64,
    /// Evaluations made by `retry_until` (default: 3)
    pub max_attempts: u32,
    /// Linear backoff step in milliseconds (default: 2000)
    pub base_delay_ms: u64,
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
    /// Prometheus listener address; metrics are not exported when `None`
    pub metrics_addr: Option<SocketAddr>,
}

impl PipelineConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set to a value
    /// that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set to a value
    /// that does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let defaults = Self::default();
        Ok(Self {
            publisher: PublisherConfig {
                max_retries: vars
                    .parse("PIPELINE_PUBLISH_MAX_RETRIES", defaults.publisher.max_retries)?,
                initial_delay_ms: vars.parse(
                    "PIPELINE_PUBLISH_INITIAL_DELAY_MS",
                    defaults.publisher.initial_delay_ms,
                )?,
                max_delay_ms: vars
                    .parse("PIPELINE_PUBLISH_MAX_DELAY_MS", defaults.publisher.max_delay_ms)?,
                jitter: vars.parse("PIPELINE_PUBLISH_JITTER", defaults.publisher.jitter)?,
            },
            consumer: ConsumerConfig {
                group: vars
                    .string("PIPELINE_CONSUMER_GROUP")
                    .unwrap_or(defaults.consumer.group),
                max_redeliveries: vars
                    .parse("PIPELINE_MAX_REDELIVERIES", defaults.consumer.max_redeliveries)?,
            },
            wait: WaitConfig {
                publish_wait_ms: vars
                    .parse("PIPELINE_PUBLISH_WAIT_MS", defaults.wait.publish_wait_ms)?,
                consume_wait_ms: vars
                    .parse("PIPELINE_CONSUME_WAIT_MS", defaults.wait.consume_wait_ms)?,
                max_attempts: vars.parse("PIPELINE_WAIT_MAX_ATTEMPTS", defaults.wait.max_attempts)?,
                base_delay_ms: vars
                    .parse("PIPELINE_WAIT_BASE_DELAY_MS", defaults.wait.base_delay_ms)?,
            },
            telemetry: TelemetryConfig {
                log_filter: vars.string("RUST_LOG").unwrap_or(defaults.telemetry.log_filter),
                metrics_addr: vars.parse_optional("PIPELINE_METRICS_ADDR")?,
            },
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publisher: PublisherConfig {
                max_retries: 3,
                initial_delay_ms: 100,
                max_delay_ms: 5_000,
                jitter: true,
            },
            consumer: ConsumerConfig {
                group: "booking-pipeline".to_string(),
                max_redeliveries: 5,
            },
            wait: WaitConfig {
                publish_wait_ms: 5_000,
                consume_wait_ms: 10_000,
                max_attempts: 3,
                base_delay_ms: 2_000,
            },
            telemetry: TelemetryConfig {
                log_filter: "info".to_string(),
                metrics_addr: None,
            },
        }
    }
}

impl PublisherConfig {
    /// Broker retry policy for the outbound publisher.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
            .build()
    }
}

impl WaitConfig {
    /// Timeout for a single publication wait.
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_wait_ms)
    }

    /// Timeout for a single consumption wait.
    #[must_use]
    pub const fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_wait_ms)
    }

    /// Linear wait policy for `retry_until`.
    #[must_use]
    pub const fn policy(&self) -> WaitPolicy {
        WaitPolicy::linear(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_optional(name)?.unwrap_or(default))
    }

    fn parse_optional<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|value| {
                value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                    name: name.to_string(),
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_registration_flow_timeouts() {
        let config = load(&[]).unwrap();

        assert_eq!(config.wait.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.wait.consume_timeout(), Duration::from_secs(10));
        assert_eq!(config.wait.policy(), WaitPolicy::linear(3, Duration::from_secs(2)));
        assert_eq!(config.consumer.max_redeliveries, 5);
        assert!(config.telemetry.metrics_addr.is_none());
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PIPELINE_PUBLISH_MAX_RETRIES", "7"),
            ("PIPELINE_PUBLISH_JITTER", "false"),
            ("PIPELINE_CONSUMER_GROUP", "passenger-projections"),
            ("PIPELINE_METRICS_ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();

        assert_eq!(config.publisher.max_retries, 7);
        assert!(!config.publisher.retry_policy().jitter);
        assert_eq!(config.publisher.retry_policy().max_attempts(), 8);
        assert_eq!(config.consumer.group, "passenger-projections");
        assert_eq!(config.telemetry.metrics_addr, Some("127.0.0.1:9090".parse().unwrap()));
    }

    #[test]
    fn invalid_value_is_reported() {
        let err = load(&[("PIPELINE_MAX_REDELIVERIES", "many")]).unwrap_err();

        match err {
            ConfigError::InvalidValue { name, value, .. } => {
                assert_eq!(name, "PIPELINE_MAX_REDELIVERIES");
                assert_eq!(value, "many");
            }
        }
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("PIPELINE_WAIT_MAX_ATTEMPTS", "  ")]).unwrap();
        assert_eq!(config.wait.max_attempts, 3);
    }
}
