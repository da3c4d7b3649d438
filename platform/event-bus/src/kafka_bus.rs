//! Kafka-backed implementation of the EventBus trait
//!
//! One topic per event type (`{prefix}.{event_type}`), created on demand
//! with the configured partition count and replication factor. Live
//! dispatch runs one consumer group per subscribing handler, so every
//! handler independently receives every matching event. Replay seeks each
//! partition to the offset resolved from the requested timestamp via the
//! broker's time index, streams forward, and stops past the upper bound.
//!
//! Replay ordering: per-partition order is native; the replay run buffers
//! the matching events and sorts by envelope timestamp before yielding, so
//! the stream is non-decreasing even with multiple partitions. Memory is
//! bounded by the requested range, which is operator-scoped.
//!
//! If a dispatch loop dies (broker connection lost for good), delivery for
//! that handler stops until the operator restarts the bus; it is never
//! terminated silently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::Message;
use rdkafka::{Offset, TopicPartitionList};
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::KafkaConfig;
use crate::envelope::{EventEnvelope, EventType};
use crate::handler::EventHandler;
use crate::registry::spawn_handler_worker;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{BusError, BusResult, BusStats, EventBus, EventStream};

/// Broker operation timeout (metadata, topic creation, produce ack)
const BROKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle window after which a replay consumer assumes it has drained the range
const REPLAY_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// EventBus implementation backed by Kafka topics
pub struct KafkaBus {
    config: KafkaConfig,
    retry: RetryConfig,
    producer: RwLock<Option<FutureProducer>>,
    admin: RwLock<Option<AdminClient<DefaultClientContext>>>,
    known_topics: Mutex<HashSet<String>>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriber_count: AtomicUsize,
    active_tasks: Arc<AtomicUsize>,
    published: RwLock<HashMap<EventType, u64>>,
    shutdown_tx: watch::Sender<bool>,
}

impl KafkaBus {
    pub fn new(config: KafkaConfig, retry: RetryConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            retry,
            producer: RwLock::new(None),
            admin: RwLock::new(None),
            known_topics: Mutex::new(HashSet::new()),
            dispatch_tasks: Mutex::new(Vec::new()),
            subscriber_count: AtomicUsize::new(0),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            published: RwLock::new(HashMap::new()),
            shutdown_tx,
        }
    }

    fn topic(&self, event_type: EventType) -> String {
        format!("{}.{}", self.config.topic_prefix, event_type)
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.config.brokers);
        config
    }

    /// Create the topic if this bus instance has not seen it yet
    ///
    /// `TopicAlreadyExists` from the broker is the expected steady state.
    async fn ensure_topic(&self, topic: &str) -> BusResult<()> {
        if self.known_topics.lock().await.contains(topic) {
            return Ok(());
        }

        let admin = self.admin.read().await;
        let admin = admin.as_ref().ok_or(BusError::NotInitialized)?;

        let new_topic = NewTopic::new(
            topic,
            self.config.partitions,
            TopicReplication::Fixed(self.config.replication_factor),
        );
        let results = admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| BusError::Internal(format!("topic creation failed: {e}")))?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(BusError::Internal(format!(
                        "failed to create topic {name}: {code}"
                    )));
                }
            }
        }

        self.known_topics.lock().await.insert(topic.to_string());
        Ok(())
    }
}

#[async_trait]
impl EventBus for KafkaBus {
    async fn initialize(&self) -> BusResult<()> {
        let producer: FutureProducer = self
            .base_config()
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BusError::Connection(format!("kafka producer init failed: {e}")))?;

        // Probe broker connectivity up front; an unreachable cluster is
        // fatal at initialize, not at first publish.
        producer
            .client()
            .fetch_metadata(None, BROKER_TIMEOUT)
            .map_err(|e| BusError::Connection(format!("kafka brokers unreachable: {e}")))?;

        let admin: AdminClient<DefaultClientContext> = self
            .base_config()
            .create()
            .map_err(|e| BusError::Connection(format!("kafka admin init failed: {e}")))?;

        *self.producer.write().await = Some(producer);
        *self.admin.write().await = Some(admin);

        tracing::info!(brokers = %self.config.brokers, "Kafka event bus initialized");
        Ok(())
    }

    async fn shutdown(&self) -> BusResult<()> {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.dispatch_tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        drop(tasks);

        *self.producer.write().await = None;
        *self.admin.write().await = None;
        self.known_topics.lock().await.clear();

        tracing::info!("Kafka event bus shut down");
        Ok(())
    }

    async fn publish(
        &self,
        event_type: EventType,
        payload: Value,
        source: &str,
        correlation_id: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> BusResult<Uuid> {
        let producer = self
            .producer
            .read()
            .await
            .clone()
            .ok_or(BusError::NotInitialized)?;

        let topic = self.topic(event_type);
        self.ensure_topic(&topic).await?;

        let mut event = EventEnvelope::new(event_type, payload, source);
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }

        let bytes = event.to_bytes()?;
        // Key by correlation id so causally related events land on one
        // partition and keep their relative order.
        let key = event.correlation_id.clone();

        retry_with_backoff(
            || {
                let producer = producer.clone();
                let topic = topic.clone();
                let key = key.clone();
                let bytes = bytes.clone();
                async move {
                    producer
                        .send(
                            FutureRecord::to(&topic).key(&key).payload(&bytes),
                            BROKER_TIMEOUT,
                        )
                        .await
                        .map(|_| ())
                        .map_err(|(e, _)| e)
                }
            },
            &self.retry,
            "kafka_publish",
        )
        .await
        .map_err(|e| BusError::Publish(e.to_string()))?;

        *self.published.write().await.entry(event_type).or_insert(0) += 1;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event_type,
            topic = %topic,
            "Event published to kafka bus"
        );
        Ok(event.id)
    }

    async fn subscribe(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<()> {
        let topics: Vec<String> = event_types.iter().map(|t| self.topic(*t)).collect();
        for topic in &topics {
            self.ensure_topic(topic).await?;
        }

        let group = format!("{}-{}", self.config.group_prefix, handler.name());
        let consumer: StreamConsumer = self
            .base_config()
            .set("group.id", &group)
            .set(
                "session.timeout.ms",
                self.config.session_timeout.as_millis().to_string(),
            )
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| BusError::Subscribe(format!("kafka consumer init failed: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let (tx, worker) = spawn_handler_worker(handler.clone(), self.active_tasks.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handler_name = handler.name().to_string();

        let dispatch_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    received = consumer.recv() => {
                        match received {
                            Ok(msg) => {
                                let Some(payload) = msg.payload() else {
                                    continue;
                                };
                                match EventEnvelope::from_bytes(payload) {
                                    Ok(event) => {
                                        let _ = tx.send(event);
                                    }
                                    Err(e) => {
                                        tracing::warn!(
                                            topic = msg.topic(),
                                            error = %e,
                                            "Dropping undecodable bus message"
                                        );
                                    }
                                }
                            }
                            Err(e) => {
                                // Transient consume errors are logged and
                                // the loop continues.
                                tracing::warn!(
                                    group = %handler_name,
                                    error = %e,
                                    "Kafka consume error"
                                );
                            }
                        }
                    }
                }
            }
            // tx drops here; the worker drains its queue and exits
            tracing::debug!(group = %handler_name, "Kafka dispatch loop stopped");
        });

        let mut tasks = self.dispatch_tasks.lock().await;
        tasks.push(dispatch_loop);
        tasks.push(worker);
        drop(tasks);

        self.subscriber_count
            .fetch_add(event_types.len(), std::sync::atomic::Ordering::SeqCst);

        tracing::info!(group = %group, topics = ?topics, "Kafka subscription started");
        Ok(())
    }

    async fn replay(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> BusResult<EventStream> {
        if self.producer.read().await.is_none() {
            return Err(BusError::NotInitialized);
        }

        let topic = self.topic(event_type);

        // A throwaway group: replay never commits offsets.
        let consumer: StreamConsumer = self
            .base_config()
            .set(
                "group.id",
                format!("{}-replay-{}", self.config.group_prefix, Uuid::new_v4()),
            )
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BusError::Replay(format!("replay consumer init failed: {e}")))?;

        let metadata = consumer
            .fetch_metadata(Some(&topic), BROKER_TIMEOUT)
            .map_err(|e| BusError::Replay(format!("metadata fetch failed: {e}")))?;
        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().len())
            .unwrap_or(0);

        if partitions == 0 {
            // Nothing ever published for this type
            return Ok(futures::stream::empty().boxed());
        }

        // Seek every partition to the first offset at or after `from`
        let mut timestamps = TopicPartitionList::new();
        for partition in 0..partitions {
            timestamps
                .add_partition_offset(
                    &topic,
                    partition as i32,
                    Offset::Offset(from.timestamp_millis()),
                )
                .map_err(|e| BusError::Replay(e.to_string()))?;
        }
        let offsets = consumer
            .offsets_for_times(timestamps, BROKER_TIMEOUT)
            .map_err(|e| BusError::Replay(format!("time-index lookup failed: {e}")))?;
        consumer
            .assign(&offsets)
            .map_err(|e| BusError::Replay(e.to_string()))?;

        let stream = async_stream::try_stream! {
            let mut collected: Vec<EventEnvelope> = Vec::new();

            loop {
                let received =
                    tokio::time::timeout(REPLAY_IDLE_TIMEOUT, consumer.recv()).await;
                let msg = match received {
                    // Idle: the range is drained
                    Err(_) => break,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Kafka replay consume error");
                        continue;
                    }
                    Ok(Ok(msg)) => msg,
                };

                let Some(payload) = msg.payload() else {
                    continue;
                };
                let event = match EventEnvelope::from_bytes(payload) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Replay skipping undecodable message");
                        continue;
                    }
                };

                // The envelope timestamp is authoritative; the broker time
                // index only bounds the seek.
                if event.timestamp < from {
                    continue;
                }
                if let Some(to) = to {
                    if event.timestamp > to {
                        continue;
                    }
                }
                collected.push(event);
            }

            collected.sort_by_key(|e| e.timestamp);
            if let Some(limit) = limit {
                collected.truncate(limit);
            }
            for event in collected {
                yield event;
            }
        };

        Ok(stream.boxed())
    }

    async fn stats(&self) -> BusResult<BusStats> {
        if self.producer.read().await.is_none() {
            return Err(BusError::NotInitialized);
        }

        let published = self.published.read().await;
        Ok(BusStats {
            backend: "kafka".to_string(),
            events_published: published
                .iter()
                .map(|(t, n)| (t.as_str().to_string(), *n))
                .collect(),
            subscriber_count: self
                .subscriber_count
                .load(std::sync::atomic::Ordering::SeqCst),
            active_dispatch_tasks: self
                .active_tasks
                .load(std::sync::atomic::Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Live tests require a running Kafka broker:
    //   docker run -p 9092:9092 apache/kafka:3.8.0
    // CI runs the contract suite against MemoryBus instead.

    fn test_config() -> KafkaConfig {
        KafkaConfig {
            brokers: "localhost:9092".to_string(),
            topic_prefix: "events-test".to_string(),
            group_prefix: "events-test".to_string(),
            partitions: 1,
            replication_factor: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_topic_layout() {
        let bus = KafkaBus::new(test_config(), RetryConfig::default());
        assert_eq!(
            bus.topic(EventType::ValidationSubmitted),
            "events-test.validation.submitted"
        );
    }

    #[tokio::test]
    async fn test_publish_before_initialize_is_rejected() {
        let bus = KafkaBus::new(test_config(), RetryConfig::default());
        let result = bus
            .publish(
                EventType::SystemError,
                serde_json::json!({}),
                "test",
                None,
                None,
            )
            .await;
        assert!(matches!(result, Err(BusError::NotInitialized)));
    }

    #[tokio::test]
    #[ignore] // Requires Kafka broker on localhost:9092
    async fn test_kafka_publish_and_replay() {
        let bus = KafkaBus::new(test_config(), RetryConfig::default());
        bus.initialize().await.unwrap();

        let from = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = bus
                .publish(
                    EventType::SignalProcessed,
                    serde_json::json!({"n": i}),
                    "test",
                    None,
                    None,
                )
                .await
                .unwrap();
            ids.push(id);
        }

        let mut stream = bus
            .replay(EventType::SignalProcessed, from, None, None)
            .await
            .unwrap();
        let mut replayed = Vec::new();
        while let Some(event) = stream.next().await {
            replayed.push(event.unwrap().id);
        }

        assert_eq!(replayed, ids);
        bus.shutdown().await.unwrap();
    }
}
