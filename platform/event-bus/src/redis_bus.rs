//! Redis-backed implementation of the EventBus trait
//!
//! Live dispatch uses one pub/sub channel per event type behind a single
//! pattern-subscribed listener connection. Pub/sub alone cannot be
//! replayed, so every publish also executes a durable second write path in
//! the same MULTI transaction:
//!
//! - `{prefix}:event:{id}`: the envelope blob, expiring under the
//!   configured retention TTL
//! - `{prefix}:index:{type}`: a sorted set of event ids scored by
//!   timestamp millis, the replay time index
//! - `{prefix}:chan:{type}`: the live pub/sub channel
//!
//! Replay pages through `ZRANGEBYSCORE` and fetches blobs with `MGET`;
//! index entries whose blobs have expired are skipped. If the dispatch
//! loop dies (connection loss), delivery stops until the operator restarts
//! the bus; it is never terminated silently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::envelope::{EventEnvelope, EventType};
use crate::handler::EventHandler;
use crate::registry::HandlerRegistry;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{BusError, BusResult, BusStats, EventBus, EventStream};

/// Page size for replay index scans
const REPLAY_PAGE_SIZE: usize = 256;

/// EventBus implementation backed by Redis pub/sub plus a keyed time index
pub struct RedisBus {
    config: RedisConfig,
    retry: RetryConfig,
    client: redis::Client,
    conn: RwLock<Option<ConnectionManager>>,
    registry: Arc<HandlerRegistry>,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisBus {
    /// Create a bus for the given configuration
    ///
    /// Validates the URL shape but does not connect; connection happens in
    /// `initialize`.
    pub fn new(config: RedisConfig, retry: RetryConfig) -> BusResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BusError::Configuration(format!("invalid redis URL: {e}")))?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            retry,
            client,
            conn: RwLock::new(None),
            registry: Arc::new(HandlerRegistry::new()),
            shutdown_tx,
            listener: Mutex::new(None),
        })
    }

    fn blob_key(&self, id: Uuid) -> String {
        format!("{}:event:{}", self.config.key_prefix, id)
    }

    fn index_key(&self, event_type: EventType) -> String {
        format!("{}:index:{}", self.config.key_prefix, event_type)
    }

    fn channel(&self, event_type: EventType) -> String {
        format!("{}:chan:{}", self.config.key_prefix, event_type)
    }

    async fn connection(&self) -> BusResult<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or(BusError::NotInitialized)
    }

    /// Start the shared pub/sub listener if it is not already running
    async fn ensure_listener(&self) -> BusResult<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connection(format!("redis pub/sub connect failed: {e}")))?;
        pubsub
            .psubscribe(format!("{}:chan:*", self.config.key_prefix))
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let registry = self.registry.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *listener = Some(tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            // Connection dropped; delivery stops until the
                            // operator restarts the bus.
                            tracing::error!("Redis dispatch loop lost its connection");
                            break;
                        };
                        match EventEnvelope::from_bytes(msg.get_payload_bytes()) {
                            Ok(event) => registry.dispatch(event).await,
                            Err(e) => {
                                tracing::warn!(
                                    channel = msg.get_channel_name(),
                                    error = %e,
                                    "Dropping undecodable bus message"
                                );
                            }
                        }
                    }
                }
            }
            tracing::debug!("Redis dispatch loop stopped");
        }));

        Ok(())
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn initialize(&self) -> BusResult<()> {
        let manager = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Connection(format!("redis connect failed: {e}")))?;
        *self.conn.write().await = Some(manager);
        self.ensure_listener().await?;

        tracing::info!(url = %self.config.url, "Redis event bus initialized");
        Ok(())
    }

    async fn shutdown(&self) -> BusResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.listener.lock().await.take() {
            let _ = handle.await;
        }
        // Queued handler work drains before workers exit
        self.registry.close().await;
        *self.conn.write().await = None;

        tracing::info!("Redis event bus shut down");
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
        let conn = self.connection().await?;

        let mut event = EventEnvelope::new(event_type, payload, source);
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }

        let bytes = event.to_bytes()?;
        let blob_key = self.blob_key(event.id);
        let index_key = self.index_key(event_type);
        let channel = self.channel(event_type);
        let member = event.id.to_string();
        let score = event.timestamp.timestamp_millis();
        let ttl_secs = self.config.retention.as_secs();

        // One MULTI transaction: durable blob + time index + live fan-out.
        // The publish either fully lands or fully fails from the caller's
        // viewpoint; delivery beyond that point is at-least-once.
        retry_with_backoff(
            || {
                let mut conn = conn.clone();
                let bytes = bytes.clone();
                let blob_key = blob_key.clone();
                let index_key = index_key.clone();
                let channel = channel.clone();
                let member = member.clone();
                async move {
                    let result: redis::RedisResult<()> = redis::pipe()
                        .atomic()
                        .cmd("SET")
                        .arg(&blob_key)
                        .arg(&bytes)
                        .arg("EX")
                        .arg(ttl_secs)
                        .ignore()
                        .cmd("ZADD")
                        .arg(&index_key)
                        .arg(score)
                        .arg(&member)
                        .ignore()
                        .cmd("PUBLISH")
                        .arg(&channel)
                        .arg(&bytes)
                        .ignore()
                        .query_async(&mut conn)
                        .await;
                    result
                }
            },
            &self.retry,
            "redis_publish",
        )
        .await
        .map_err(|e| BusError::Publish(e.to_string()))?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event_type,
            "Event published to redis bus"
        );
        Ok(event.id)
    }

    async fn subscribe(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<()> {
        self.registry.add(event_types, handler).await;
        // Listener is shared across all subscriptions; starting it twice is
        // a no-op.
        self.ensure_listener().await
    }

    async fn replay(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> BusResult<EventStream> {
        let conn = self.connection().await?;
        let index_key = self.index_key(event_type);
        let prefix = self.config.key_prefix.clone();
        let min = from.timestamp_millis();
        let max = to.map(|t| t.timestamp_millis().to_string());
        let max_events = limit.unwrap_or(usize::MAX);

        let stream = async_stream::try_stream! {
            let mut conn = conn;
            let mut offset = 0usize;
            let mut yielded = 0usize;

            'pages: loop {
                let max_arg = max.clone().unwrap_or_else(|| "+inf".to_string());
                let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                    .arg(&index_key)
                    .arg(min)
                    .arg(&max_arg)
                    .arg("LIMIT")
                    .arg(offset as isize)
                    .arg(REPLAY_PAGE_SIZE as isize)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| BusError::Replay(e.to_string()))?;

                if ids.is_empty() {
                    break;
                }
                offset += ids.len();

                let mut mget = redis::cmd("MGET");
                for id in &ids {
                    mget.arg(format!("{prefix}:event:{id}"));
                }
                let blobs: Vec<Option<Vec<u8>>> = mget
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| BusError::Replay(e.to_string()))?;

                for (id, blob) in ids.iter().zip(blobs) {
                    let Some(blob) = blob else {
                        // Index outlived the blob's TTL; skip.
                        tracing::debug!(event_id = %id, "Replay skipping expired event blob");
                        continue;
                    };
                    let event = EventEnvelope::from_bytes(&blob)
                        .map_err(|e| BusError::Replay(format!("event {id}: {e}")))?;
                    yield event;
                    yielded += 1;
                    if yielded >= max_events {
                        break 'pages;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn stats(&self) -> BusResult<BusStats> {
        let mut conn = self.connection().await?;

        // The sorted indexes are the durable truth for per-type counts
        // (shared across publisher processes), bounded by retention expiry.
        let mut events_published = std::collections::HashMap::new();
        for event_type in EventType::ALL {
            let count: u64 = redis::cmd("ZCARD")
                .arg(self.index_key(event_type))
                .query_async(&mut conn)
                .await
                .map_err(|e| BusError::Internal(e.to_string()))?;
            if count > 0 {
                events_published.insert(event_type.as_str().to_string(), count);
            }
        }

        Ok(BusStats {
            backend: "redis".to_string(),
            events_published,
            subscriber_count: self.registry.subscription_count().await,
            active_dispatch_tasks: self.registry.active_count(),
        })
    }
}
