//! Configuration loading, validation, and management for the InvokeLens SDK.
//!
//! A configuration can be built in code, loaded from a TOML file, or taken
//! from the environment. Every path ends in [`SdkConfig::validate`], so an
//! invalid configuration fails construction instead of surfacing later on
//! the delivery path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default ingestion endpoint.
pub const DEFAULT_ENDPOINT_URL: &str = "https://api.invokelens.com";

/// Hard upper bound on `max_queue_size`.
pub const MAX_QUEUE_CAPACITY: usize = 100_000;

/// Shortest accepted `flush_interval` / `shutdown_timeout_secs`.
pub const MIN_INTERVAL_SECS: f64 = 0.001;

/// Longest accepted interval or timeout, in seconds (one day).
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// The root SDK configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    /// API key sent as a bearer credential (required)
    #[serde(default)]
    pub api_key: String,

    /// Ingestion endpoint base URL
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Which transport delivers batches
    #[serde(default)]
    pub transport_mode: TransportMode,

    /// Bus name, required when `transport_mode = "eventbridge"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_bus_name: Option<String>,

    /// Events per batch (and size-trigger threshold)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between time-triggered flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval: f64,

    /// Maximum number of pending events
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// What to discard when the queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound for the final flush on shutdown, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: f64,

    /// AWS region reported on events (falls back to the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// HTTP retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Custom model pricing overrides (model id → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_endpoint_url() -> String {
    DEFAULT_ENDPOINT_URL.into()
}
fn default_batch_size() -> usize {
    10
}
fn default_flush_interval() -> f64 {
    5.0
}
fn default_max_queue_size() -> usize {
    1000
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_shutdown_timeout_secs() -> f64 {
    10.0
}

/// Whether `value` is usable as a per-million-token price.
pub fn valid_price(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn check_seconds(field: &str, value: f64) -> Result<(), ConfigError> {
    let in_range = (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&value);
    if !in_range || Duration::try_from_secs_f64(value).is_err() {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS} seconds"
        )));
    }
    Ok(())
}

fn clamp_seconds(value: f64, fallback: f64) -> Duration {
    let secs = if value.is_finite() { value } else { fallback };
    Duration::from_secs_f64(secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS))
}

/// Redact a secret string for Debug output.
fn redact(s: &str) -> &'static str {
    if s.is_empty() { "<empty>" } else { "[REDACTED]" }
}

impl std::fmt::Debug for SdkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint_url", &self.endpoint_url)
            .field("transport_mode", &self.transport_mode)
            .field("event_bus_name", &self.event_bus_name)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("max_queue_size", &self.max_queue_size)
            .field("overflow_policy", &self.overflow_policy)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("region", &self.region)
            .field("retry", &self.retry)
            .field("custom_pricing", &self.custom_pricing)
            .finish()
    }
}

/// Delivery backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Batched HTTPS POST to the ingest endpoint.
    #[default]
    Http,
    /// One message per event on a named event bus.
    Eventbridge,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Eventbridge => write!(f, "eventbridge"),
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "eventbridge" => Ok(Self::Eventbridge),
            other => Err(ConfigError::ValidationError(format!(
                "transport_mode must be \"http\" or \"eventbridge\", got \"{other}\""
            ))),
        }
    }
}

/// Which event is discarded when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming event.
    #[default]
    DropNewest,
    /// Evict the oldest pending event to make room.
    DropOldest,
}

/// Exponential backoff settings for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Factor applied to the delay after each failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Ceiling for a single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random spread: each delay is scaled by a factor in [1 - jitter, 1 + jitter]
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Whether 4xx responses are retried like 5xx responses
    #[serde(default = "default_true")]
    pub retry_client_errors: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}
fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
            retry_client_errors: true,
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl SdkConfig {
    /// A configuration with defaults for everything but the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Switch to the event bus transport.
    pub fn with_event_bus(mut self, bus_name: impl Into<String>) -> Self {
        self.transport_mode = TransportMode::Eventbridge;
        self.event_bus_name = Some(bus_name.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the flush interval in seconds.
    pub fn with_flush_interval(mut self, secs: f64) -> Self {
        self.flush_interval = secs;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_custom_pricing(
        mut self,
        model_id: impl Into<String>,
        input_per_m: f64,
        output_per_m: f64,
    ) -> Self {
        self.custom_pricing.insert(
            model_id.into(),
            PricingOverrideConfig {
                input_per_m,
                output_per_m,
            },
        );
        self
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.apply_env_overrides()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), mode = %config.transport_mode, "Loaded SDK config");
        Ok(config)
    }

    /// Build a configuration purely from environment variables.
    ///
    /// - `INVOKELENS_API_KEY` (required)
    /// - `INVOKELENS_ENDPOINT_URL`
    /// - `INVOKELENS_TRANSPORT_MODE`
    /// - `INVOKELENS_EVENT_BUS_NAME`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `INVOKELENS_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary key lookup (environment-shaped).
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("INVOKELENS_API_KEY") {
            self.api_key = key;
        }
        if let Some(url) = lookup("INVOKELENS_ENDPOINT_URL") {
            self.endpoint_url = url;
        }
        if let Some(mode) = lookup("INVOKELENS_TRANSPORT_MODE") {
            self.transport_mode = mode.parse()?;
        }
        if let Some(bus) = lookup("INVOKELENS_EVENT_BUS_NAME") {
            self.event_bus_name = Some(bus);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api_key is required and must not be empty".into(),
            ));
        }

        if !(self.endpoint_url.starts_with("http://") || self.endpoint_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "endpoint_url must be an http(s) URL, got \"{}\"",
                self.endpoint_url
            )));
        }

        if self.transport_mode == TransportMode::Eventbridge
            && self
                .event_bus_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "event_bus_name is required when transport_mode is eventbridge".into(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch_size must be a positive integer".into(),
            ));
        }

        check_seconds("flush_interval", self.flush_interval)?;

        if self.max_queue_size == 0 || self.max_queue_size > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::ValidationError(format!(
                "max_queue_size must be between 1 and {MAX_QUEUE_CAPACITY}"
            )));
        }

        if self.request_timeout_secs == 0
            || self.request_timeout_secs as f64 > MAX_INTERVAL_SECS
        {
            return Err(ConfigError::ValidationError(format!(
                "request_timeout_secs must be between 1 and {MAX_INTERVAL_SECS}"
            )));
        }

        check_seconds("shutdown_timeout_secs", self.shutdown_timeout_secs)?;

        self.retry.validate()?;

        for (model, pricing) in &self.custom_pricing {
            if !valid_price(pricing.input_per_m) || !valid_price(pricing.output_per_m) {
                return Err(ConfigError::ValidationError(format!(
                    "custom pricing for {model} must be finite and non-negative"
                )));
            }
        }

        Ok(())
    }

    /// `flush_interval` as a [`Duration`], clamped into the accepted range.
    /// Values that cannot be converted fall back to the default.
    pub fn flush_interval_duration(&self) -> Duration {
        clamp_seconds(self.flush_interval, default_flush_interval())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        clamp_seconds(self.shutdown_timeout_secs, default_shutdown_timeout_secs())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Region reported on events: config, then `AWS_REGION`,
    /// then `AWS_DEFAULT_REGION`, then `us-east-1`.
    pub fn resolved_region(&self) -> String {
        self.region
            .clone()
            .or_else(|| std::env::var("AWS_REGION").ok())
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .unwrap_or_else(|| invokelens_core::event::DEFAULT_REGION.to_string())
    }

    /// Generate a sample config TOML string.
    pub fn default_toml() -> String {
        let config = Self::new("il_live_replace_me");
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::ValidationError(
                "retry.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint_url: default_endpoint_url(),
            transport_mode: TransportMode::default(),
            event_bus_name: None,
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            max_queue_size: default_max_queue_size(),
            overflow_policy: OverflowPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            region: None,
            retry: RetryConfig::default(),
            custom_pricing: HashMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for invokelens_core::Error {
    fn from(err: ConfigError) -> Self {
        invokelens_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SdkConfig::new("key");
        assert_eq!(config.endpoint_url, DEFAULT_ENDPOINT_URL);
        assert_eq!(config.transport_mode, TransportMode::Http);
        assert_eq!(config.batch_size, 10);
        assert!((config.flush_interval - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_api_key_rejected() {
        let err = SdkConfig::new("  ").validate().unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn eventbridge_requires_bus_name() {
        let config = SdkConfig {
            transport_mode: TransportMode::Eventbridge,
            ..SdkConfig::new("key")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("event_bus_name"));

        let config = SdkConfig::new("key").with_event_bus("invokelens-bus");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_batch_and_interval_rejected() {
        assert!(SdkConfig::new("key").with_batch_size(0).validate().is_err());
        assert!(SdkConfig::new("key").with_flush_interval(0.0).validate().is_err());
        assert!(SdkConfig::new("key").with_flush_interval(-1.0).validate().is_err());
        assert!(
            SdkConfig::new("key")
                .with_flush_interval(f64::NAN)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn out_of_range_durations_rejected() {
        for secs in [1e20, f64::INFINITY, 1e-12, 0.0005] {
            assert!(
                SdkConfig::new("key").with_flush_interval(secs).validate().is_err(),
                "flush_interval {secs} accepted"
            );
            let mut config = SdkConfig::new("key");
            config.shutdown_timeout_secs = secs;
            assert!(config.validate().is_err(), "shutdown_timeout_secs {secs} accepted");
        }

        let mut config = SdkConfig::new("key").with_flush_interval(MIN_INTERVAL_SECS);
        config.shutdown_timeout_secs = MAX_INTERVAL_SECS;
        assert!(config.validate().is_ok());

        let mut config = SdkConfig::new("key");
        config.request_timeout_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_accessors_never_panic() {
        let mut config = SdkConfig::new("key").with_flush_interval(1e20);
        config.shutdown_timeout_secs = f64::NAN;
        assert_eq!(
            config.flush_interval_duration(),
            Duration::from_secs_f64(MAX_INTERVAL_SECS)
        );
        assert_eq!(
            config.shutdown_timeout(),
            Duration::from_secs_f64(default_shutdown_timeout_secs())
        );

        let config = SdkConfig::new("key").with_flush_interval(1e-12);
        assert_eq!(config.flush_interval_duration(), Duration::from_millis(1));
        let config = SdkConfig::new("key").with_flush_interval(-3.0);
        assert_eq!(config.flush_interval_duration(), Duration::from_millis(1));
    }

    #[test]
    fn non_finite_or_negative_prices_rejected() {
        let cases = [(f64::NAN, 1.0), (1.0, f64::INFINITY), (-0.5, 1.0), (1.0, -2.0)];
        for (input, output) in cases {
            let config = SdkConfig::new("key").with_custom_pricing("acme.model", input, output);
            assert!(config.validate().is_err(), "({input}, {output}) accepted");
        }
        let config = SdkConfig::new("key").with_custom_pricing("acme.model", 0.0, 2.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn queue_size_is_capped() {
        assert!(SdkConfig::new("key").with_max_queue_size(0).validate().is_err());
        assert!(
            SdkConfig::new("key")
                .with_max_queue_size(MAX_QUEUE_CAPACITY + 1)
                .validate()
                .is_err()
        );
        assert!(
            SdkConfig::new("key")
                .with_max_queue_size(MAX_QUEUE_CAPACITY)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn endpoint_must_be_http() {
        let err = SdkConfig::new("key")
            .with_endpoint_url("ftp://example.com")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("endpoint_url"));
    }

    #[test]
    fn retry_bounds_checked() {
        let retry = RetryConfig {
            jitter: 1.5,
            ..RetryConfig::default()
        };
        assert!(SdkConfig::new("key").with_retry(retry).validate().is_err());

        let retry = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(SdkConfig::new("key").with_retry(retry).validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = SdkConfig::new("il_live_secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("il_live_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn transport_mode_parsing() {
        assert_eq!("HTTP".parse::<TransportMode>().unwrap(), TransportMode::Http);
        assert_eq!(
            "eventbridge".parse::<TransportMode>().unwrap(),
            TransportMode::Eventbridge
        );
        assert!("kafka".parse::<TransportMode>().is_err());
    }

    #[test]
    fn overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("INVOKELENS_API_KEY", "env-key"),
            ("INVOKELENS_TRANSPORT_MODE", "eventbridge"),
            ("INVOKELENS_EVENT_BUS_NAME", "telemetry-bus"),
        ]
        .into_iter()
        .collect();

        let mut config = SdkConfig::default();
        config
            .apply_overrides_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.transport_mode, TransportMode::Eventbridge);
        assert_eq!(config.event_bus_name.as_deref(), Some("telemetry-bus"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invokelens.toml");
        std::fs::write(
            &path,
            r#"
api_key = "file-key"
batch_size = 25
flush_interval = 2.5
overflow_policy = "drop_oldest"

[retry]
max_attempts = 5
jitter = 0.0

[custom_pricing."my-custom-model"]
input_per_m = 1.0
output_per_m = 2.0
"#,
        )
        .unwrap();

        let config = SdkConfig::load_from(&path).unwrap();
        assert_eq!(config.batch_size, 25);
        assert!((config.flush_interval - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 1000);
        assert_eq!(config.custom_pricing["my-custom-model"].output_per_m, 2.0);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SdkConfig::load_from(Path::new("/nonexistent/invokelens.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn default_toml_roundtrips() {
        let toml_str = SdkConfig::default_toml();
        let parsed: SdkConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.batch_size, 10);
        assert_eq!(parsed.endpoint_url, DEFAULT_ENDPOINT_URL);
    }

    #[test]
    fn durations_convert() {
        let config = SdkConfig::new("key").with_flush_interval(0.25);
        assert_eq!(config.flush_interval_duration(), Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.initial_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn explicit_region_wins() {
        let config = SdkConfig::new("key").with_region("eu-west-1");
        assert_eq!(config.resolved_region(), "eu-west-1");
    }

    #[test]
    fn config_error_converts_to_core_error() {
        let err: invokelens_core::Error = ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(err, invokelens_core::Error::Config { .. }));
    }
}
