//! Relay configuration, loaded from `CATALOG_*` environment variables.
//!
//! Every value has a default suitable for a local broker. The producer and consumer
//! delivery contracts are fixed and checked by [`RelayConfig::validate`] at startup; they
//! are not meant to be tuned per deployment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use catalog_core::{DomainError, TenantId};
use catalog_events::RetryPolicy;
use catalog_events::retry::{
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, DEFAULT_MULTIPLIER,
};
use catalog_products::ProductTopics;

pub const ENV_BACKEND: &str = "CATALOG_BACKEND";
pub const ENV_BROKER_URL: &str = "CATALOG_BROKER_URL";
pub const ENV_CONSUMER_GROUP: &str = "CATALOG_CONSUMER_GROUP";
pub const ENV_TENANT_ID: &str = "CATALOG_TENANT_ID";
pub const ENV_TOPIC_UPSERT: &str = "CATALOG_TOPIC_UPSERT";
pub const ENV_TOPIC_UPSERT_FAIL: &str = "CATALOG_TOPIC_UPSERT_FAIL";
pub const ENV_TOPIC_UPSERT_RETRY: &str = "CATALOG_TOPIC_UPSERT_RETRY";
pub const ENV_TOPIC_DELETE: &str = "CATALOG_TOPIC_DELETE";
pub const ENV_TOPIC_DELETE_FAIL: &str = "CATALOG_TOPIC_DELETE_FAIL";
pub const ENV_TOPIC_DELETE_RETRY: &str = "CATALOG_TOPIC_DELETE_RETRY";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "CATALOG_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_INITIAL_DELAY_MS: &str = "CATALOG_RETRY_INITIAL_DELAY_MS";
pub const ENV_RETRY_MULTIPLIER: &str = "CATALOG_RETRY_MULTIPLIER";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "CATALOG_RETRY_MAX_DELAY_MS";

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_KAFKA_BOOTSTRAP: &str = "127.0.0.1:9092";
const DEFAULT_CONSUMER_GROUP: &str = "product-service";
const DEFAULT_TENANT_ID: &str = "product-service";

/// librdkafka's upper bound for `retries`.
const MAX_CLIENT_RETRIES: u32 = i32::MAX as u32;
/// Highest in-flight count at which an idempotent producer keeps per-partition order.
const MAX_IN_FLIGHT_WITH_IDEMPOTENCE: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("delivery contract violated: {0}")]
    Contract(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Which broker the relay talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerBackend {
    #[default]
    Redis,
    Kafka,
}

impl BrokerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerBackend::Redis => "redis",
            BrokerBackend::Kafka => "kafka",
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self {
            BrokerBackend::Redis => DEFAULT_REDIS_URL,
            BrokerBackend::Kafka => DEFAULT_KAFKA_BOOTSTRAP,
        }
    }
}

impl FromStr for BrokerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "kafka" => Ok(Self::Kafka),
            other => Err(format!("unknown broker backend: {other}")),
        }
    }
}

/// Broker acknowledgment level required before a send counts as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    None,
    Leader,
    All,
}

impl Acks {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

/// Producer delivery contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    pub enable_idempotence: bool,
    pub acks: Acks,
    pub max_in_flight: u32,
    /// Client-level resend count for transient broker errors.
    pub retries: u32,
    /// Upper bound on the client's own resend loop, after which the delivery
    /// callback reports a timeout.
    pub delivery_timeout: Duration,
    pub linger: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            enable_idempotence: true,
            acks: Acks::All,
            max_in_flight: MAX_IN_FLIGHT_WITH_IDEMPOTENCE,
            retries: MAX_CLIENT_RETRIES,
            delivery_timeout: Duration::from_secs(120),
            linger: Duration::from_millis(5),
        }
    }
}

impl ProducerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enable_idempotence {
            return Err(ConfigError::Contract("producer idempotence must be enabled".into()));
        }
        if self.acks != Acks::All {
            return Err(ConfigError::Contract("producer acks must be 'all'".into()));
        }
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT_WITH_IDEMPOTENCE {
            return Err(ConfigError::Contract(format!(
                "max in-flight requests must be between 1 and {MAX_IN_FLIGHT_WITH_IDEMPOTENCE}, got {}",
                self.max_in_flight
            )));
        }
        if self.retries == 0 {
            return Err(ConfigError::Contract("producer retries must be non-zero".into()));
        }
        Ok(())
    }

    /// Client properties in librdkafka naming.
    pub fn client_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("enable.idempotence", self.enable_idempotence.to_string()),
            ("acks", self.acks.as_str().to_string()),
            (
                "max.in.flight.requests.per.connection",
                self.max_in_flight.to_string(),
            ),
            ("retries", self.retries.to_string()),
            (
                "delivery.timeout.ms",
                self.delivery_timeout.as_millis().to_string(),
            ),
            ("linger.ms", self.linger.as_millis().to_string()),
        ]
    }
}

/// Where a consumer group without a committed position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Retry-topic consumer contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub group_id: String,
    /// Must stay `false`: records are committed by the retry consumer.
    pub enable_auto_commit: bool,
    pub auto_offset_reset: OffsetReset,
    pub poll_timeout: Duration,
    pub session_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_CONSUMER_GROUP.to_string(),
            enable_auto_commit: false,
            auto_offset_reset: OffsetReset::Earliest,
            poll_timeout: Duration::from_millis(250),
            session_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsumerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_auto_commit {
            return Err(ConfigError::Contract(
                "consumer auto-commit must be disabled (manual acknowledgment)".into(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Contract("consumer group id must not be blank".into()));
        }
        Ok(())
    }

    /// Client properties in librdkafka naming.
    pub fn client_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("group.id", self.group_id.clone()),
            ("enable.auto.commit", self.enable_auto_commit.to_string()),
            ("auto.offset.reset", self.auto_offset_reset.as_str().to_string()),
            (
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            ),
        ]
    }
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub backend: BrokerBackend,
    /// Redis URL or Kafka bootstrap servers, depending on `backend`.
    pub endpoint: String,
    /// Tenant the catalog service publishes for.
    pub tenant_id: TenantId,
    pub topics: ProductTopics,
    pub retry: RetryPolicy,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let backend = match get(ENV_BACKEND) {
            Some(raw) => raw
                .parse::<BrokerBackend>()
                .map_err(|reason| ConfigError::invalid(ENV_BACKEND, &raw, reason))?,
            None => BrokerBackend::default(),
        };
        let endpoint = get(ENV_BROKER_URL).unwrap_or_else(|| backend.default_endpoint().to_string());
        let tenant_id = TenantId::new(get(ENV_TENANT_ID).unwrap_or_else(|| DEFAULT_TENANT_ID.to_string()))?;

        let defaults = ProductTopics::default();
        let topics = ProductTopics {
            upsert: get(ENV_TOPIC_UPSERT).unwrap_or(defaults.upsert),
            upsert_fail: get(ENV_TOPIC_UPSERT_FAIL).unwrap_or(defaults.upsert_fail),
            upsert_retry: get(ENV_TOPIC_UPSERT_RETRY).unwrap_or(defaults.upsert_retry),
            delete: get(ENV_TOPIC_DELETE).unwrap_or(defaults.delete),
            delete_fail: get(ENV_TOPIC_DELETE_FAIL).unwrap_or(defaults.delete_fail),
            delete_retry: get(ENV_TOPIC_DELETE_RETRY).unwrap_or(defaults.delete_retry),
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, ENV_RETRY_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS)?,
            initial_delay: Duration::from_millis(parse_or(
                &get,
                ENV_RETRY_INITIAL_DELAY_MS,
                DEFAULT_INITIAL_DELAY_MS,
            )?),
            multiplier: parse_or(&get, ENV_RETRY_MULTIPLIER, DEFAULT_MULTIPLIER)?,
            max_delay: Duration::from_millis(parse_or(
                &get,
                ENV_RETRY_MAX_DELAY_MS,
                DEFAULT_MAX_DELAY_MS,
            )?),
        };

        let consumer = ConsumerSettings {
            group_id: get(ENV_CONSUMER_GROUP).unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            ..ConsumerSettings::default()
        };

        let config = Self {
            backend,
            endpoint,
            tenant_id,
            topics,
            retry,
            producer: ProducerSettings::default(),
            consumer,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retry(&self.retry)?;
        validate_topics(&self.topics)?;
        self.producer.validate()?;
        self.consumer.validate()
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn validate_retry(policy: &RetryPolicy) -> Result<(), ConfigError> {
    if policy.max_attempts == 0 {
        return Err(ConfigError::invalid(
            ENV_RETRY_MAX_ATTEMPTS,
            "0",
            "at least one attempt is required",
        ));
    }
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(ConfigError::invalid(
            ENV_RETRY_MULTIPLIER,
            &policy.multiplier.to_string(),
            "must be a finite number >= 1.0",
        ));
    }
    if policy.max_delay < policy.initial_delay {
        return Err(ConfigError::invalid(
            ENV_RETRY_MAX_DELAY_MS,
            &policy.max_delay.as_millis().to_string(),
            "must not be below the initial delay",
        ));
    }
    Ok(())
}

fn validate_topics(topics: &ProductTopics) -> Result<(), ConfigError> {
    let groups = [
        ("upsert", [&topics.upsert, &topics.upsert_fail, &topics.upsert_retry]),
        ("delete", [&topics.delete, &topics.delete_fail, &topics.delete_retry]),
    ];
    for (name, [main, fail, retry]) in groups {
        if main == fail || main == retry || fail == retry {
            return Err(ConfigError::Contract(format!(
                "{name} main, fail and retry topics must be distinct"
            )));
        }
    }
    Ok(())
}
