//! Environment-driven bus configuration
//!
//! Configuration is parsed once at process start and validated before any
//! connection attempt; an invalid configuration fails fast with a
//! descriptive [`BusError::Configuration`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{BusError, BusResult};

/// Which backend the factory constructs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Redis,
    Kafka,
    /// In-process bus for dev/test
    Memory,
}

impl FromStr for BusBackend {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(BusBackend::Redis),
            "kafka" => Ok(BusBackend::Kafka),
            "memory" | "inmemory" => Ok(BusBackend::Memory),
            other => Err(BusError::Configuration(format!(
                "unknown bus backend '{other}' (expected redis, kafka, or memory)"
            ))),
        }
    }
}

/// Redis backend settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`
    pub url: String,
    /// Prefix for channels, blob keys, and time indexes
    pub key_prefix: String,
    /// Retention TTL for replayable event blobs
    pub retention: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            key_prefix: "events".to_string(),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Kafka backend settings
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker list, e.g. `localhost:9092`
    pub brokers: String,
    /// Prefix for per-event-type topics
    pub topic_prefix: String,
    /// Prefix for per-handler consumer groups
    pub group_prefix: String,
    /// Partitions for topics created on demand
    pub partitions: i32,
    /// Replication factor for topics created on demand
    pub replication_factor: i32,
    /// Consumer session timeout
    pub session_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic_prefix: "events".to_string(),
            group_prefix: "event-bus".to_string(),
            partitions: 3,
            replication_factor: 1,
            session_timeout: Duration::from_secs(10),
        }
    }
}

/// Full bus configuration consumed by the factory
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    /// Batch size threshold for [`crate::BatchingPublisher`]
    pub batch_size: usize,
    /// Cadence for the optional periodic batch flush task
    pub flush_interval: Duration,
    /// Max attempts for transient durable-write/produce failures
    pub max_retries: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            redis: RedisConfig::default(),
            kafka: KafkaConfig::default(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl BusConfig {
    /// Parse configuration from environment variables
    ///
    /// | Variable | Effect | Default |
    /// |---|---|---|
    /// | `EVENT_BUS_BACKEND` | `redis` \| `kafka` \| `memory` | `memory` |
    /// | `REDIS_URL` | Redis connection URL | `redis://localhost:6379/0` |
    /// | `EVENT_KEY_PREFIX` | Redis key/channel prefix | `events` |
    /// | `EVENT_TTL_SECS` | Replay retention TTL | 86400 |
    /// | `KAFKA_BROKERS` | Kafka broker list | `localhost:9092` |
    /// | `KAFKA_TOPIC_PREFIX` | Topic prefix | `events` |
    /// | `KAFKA_CONSUMER_GROUP` | Consumer group prefix | `event-bus` |
    /// | `KAFKA_PARTITIONS` | Partitions per topic | 3 |
    /// | `KAFKA_REPLICATION` | Replication factor | 1 |
    /// | `EVENT_BATCH_SIZE` | Batching publisher threshold | 100 |
    /// | `EVENT_FLUSH_INTERVAL_MS` | Periodic batch flush cadence | 5000 |
    /// | `EVENT_MAX_RETRIES` | Transient-failure retry cap | 3 |
    pub fn from_env() -> BusResult<Self> {
        let mut config = BusConfig::default();

        if let Ok(backend) = env::var("EVENT_BUS_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Ok(url) = env::var("REDIS_URL") {
            config.redis.url = url;
        }
        if let Ok(prefix) = env::var("EVENT_KEY_PREFIX") {
            config.redis.key_prefix = prefix;
        }
        if let Ok(ttl) = env::var("EVENT_TTL_SECS") {
            let secs: u64 = ttl.parse().map_err(|_| {
                BusError::Configuration("EVENT_TTL_SECS must be a positive integer".to_string())
            })?;
            config.redis.retention = Duration::from_secs(secs);
        }
        if let Ok(brokers) = env::var("KAFKA_BROKERS") {
            config.kafka.brokers = brokers;
        }
        if let Ok(prefix) = env::var("KAFKA_TOPIC_PREFIX") {
            config.kafka.topic_prefix = prefix;
        }
        if let Ok(group) = env::var("KAFKA_CONSUMER_GROUP") {
            config.kafka.group_prefix = group;
        }
        if let Ok(partitions) = env::var("KAFKA_PARTITIONS") {
            config.kafka.partitions = partitions.parse().map_err(|_| {
                BusError::Configuration("KAFKA_PARTITIONS must be an integer".to_string())
            })?;
        }
        if let Ok(replication) = env::var("KAFKA_REPLICATION") {
            config.kafka.replication_factor = replication.parse().map_err(|_| {
                BusError::Configuration("KAFKA_REPLICATION must be an integer".to_string())
            })?;
        }
        if let Ok(batch) = env::var("EVENT_BATCH_SIZE") {
            config.batch_size = batch.parse().map_err(|_| {
                BusError::Configuration("EVENT_BATCH_SIZE must be a positive integer".to_string())
            })?;
        }
        if let Ok(interval) = env::var("EVENT_FLUSH_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                BusError::Configuration(
                    "EVENT_FLUSH_INTERVAL_MS must be a positive integer".to_string(),
                )
            })?;
            config.flush_interval = Duration::from_millis(millis);
        }
        if let Ok(retries) = env::var("EVENT_MAX_RETRIES") {
            config.max_retries = retries.parse().map_err(|_| {
                BusError::Configuration("EVENT_MAX_RETRIES must be an integer".to_string())
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for the selected backend
    ///
    /// Runs before any connection attempt; violations surface as
    /// [`BusError::Configuration`].
    pub fn validate(&self) -> BusResult<()> {
        match self.backend {
            BusBackend::Redis => {
                if self.redis.url.trim().is_empty() {
                    return Err(BusError::Configuration(
                        "redis backend selected but REDIS_URL is empty".to_string(),
                    ));
                }
                if self.redis.retention.is_zero() {
                    return Err(BusError::Configuration(
                        "event retention TTL must be greater than zero".to_string(),
                    ));
                }
            }
            BusBackend::Kafka => {
                if self.kafka.brokers.trim().is_empty() {
                    return Err(BusError::Configuration(
                        "kafka backend selected but KAFKA_BROKERS is empty".to_string(),
                    ));
                }
                if self.kafka.partitions < 1 {
                    return Err(BusError::Configuration(format!(
                        "KAFKA_PARTITIONS must be >= 1, got {}",
                        self.kafka.partitions
                    )));
                }
                if self.kafka.replication_factor < 1 {
                    return Err(BusError::Configuration(format!(
                        "KAFKA_REPLICATION must be >= 1, got {}",
                        self.kafka.replication_factor
                    )));
                }
            }
            BusBackend::Memory => {}
        }

        if self.batch_size == 0 {
            return Err(BusError::Configuration(
                "EVENT_BATCH_SIZE must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(BusError::Configuration(
                "EVENT_FLUSH_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("redis".parse::<BusBackend>().unwrap(), BusBackend::Redis);
        assert_eq!("KAFKA".parse::<BusBackend>().unwrap(), BusBackend::Kafka);
        assert_eq!("memory".parse::<BusBackend>().unwrap(), BusBackend::Memory);
        assert!("rabbitmq".parse::<BusBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_kafka_partitions() {
        let mut config = BusConfig {
            backend: BusBackend::Kafka,
            ..Default::default()
        };
        config.kafka.partitions = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("KAFKA_PARTITIONS"));
    }

    #[test]
    fn test_validate_rejects_empty_endpoint() {
        let mut config = BusConfig {
            backend: BusBackend::Redis,
            ..Default::default()
        };
        config.redis.url = "".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_replication() {
        let mut config = BusConfig {
            backend: BusBackend::Kafka,
            ..Default::default()
        };
        config.kafka.replication_factor = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(BusConfig::default().validate().is_ok());
    }
}
