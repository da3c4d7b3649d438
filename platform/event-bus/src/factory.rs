//! Backend selection
//!
//! Pure construction: validate the configuration, build the concrete bus,
//! hand it back as a trait object. No connections are made here; the
//! caller owns the lifecycle (`initialize` once at startup, `shutdown`
//! exactly once at teardown) and passes the `Arc` down to publishers and
//! consumers, so there is no hidden process-global bus.

use std::sync::Arc;

use crate::config::{BusBackend, BusConfig};
use crate::kafka_bus::KafkaBus;
use crate::memory_bus::MemoryBus;
use crate::redis_bus::RedisBus;
use crate::retry::RetryConfig;
use crate::{BusResult, EventBus};

/// Construct the configured bus backend
///
/// Fails fast with [`crate::BusError::Configuration`] on an invalid
/// configuration, before any connection attempt.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{create_event_bus, BusConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BusConfig::from_env()?;
/// let bus = create_event_bus(&config)?;
/// bus.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub fn create_event_bus(config: &BusConfig) -> BusResult<Arc<dyn EventBus>> {
    config.validate()?;
    let retry = RetryConfig::with_max_attempts(config.max_retries);

    let bus: Arc<dyn EventBus> = match config.backend {
        BusBackend::Redis => Arc::new(RedisBus::new(config.redis.clone(), retry)?),
        BusBackend::Kafka => Arc::new(KafkaBus::new(config.kafka.clone(), retry)),
        BusBackend::Memory => Arc::new(MemoryBus::new()),
    };

    tracing::info!(backend = ?config.backend, "Event bus constructed");
    Ok(bus)
}
