//! # EventBus Abstraction
//!
//! A platform-level abstraction for keyed, partitioned event delivery between
//! services.
//!
//! ## Delivery model
//!
//! - Messages are published to a **topic** with a **key**. All messages that
//!   share a key land in the same partition and are consumed in publish order.
//! - Consumers join a **consumer group** and pull messages through a
//!   [`ConsumerConnection`]. Offsets are committed manually, only after the
//!   message was handled, which gives at-least-once delivery.
//! - A freshly created group starts from the earliest retained message.
//!
//! ## Implementations
//!
//! - **KafkaBus**: Production implementation backed by rdkafka (feature `kafka`)
//! - **InMemoryBus**: Test/dev implementation with partitioned in-process logs
//!
//! ## Usage
//!
//! ```rust
//! use event_bus::{EventBus, EventProducer, InMemoryBus, OutboundMessage};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! let producer = EventProducer::new(bus.clone());
//!
//! producer
//!     .publish("shipping.shipment.created", "shipment-1", "{\"trackingNumber\":\"ABC123\"}", None)
//!     .await?;
//!
//! let mut consumer = bus.connect("identity-shipmentcreated-consumer").await?;
//! consumer.subscribe("shipping.shipment.created").await?;
//! if let Some(msg) = consumer.poll(Duration::from_millis(100)).await? {
//!     consumer.commit(&msg).await?;
//! }
//! consumer.close().await?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
pub mod consumer_retry;
mod envelope;
mod inmemory_bus;
#[cfg(feature = "kafka")]
mod kafka_bus;
mod producer;
mod topics;

pub use codec::{decode_payload, encode_payload};
pub use config::{BusConfig, BusType, ConfigError};
pub use envelope::{DomainEvent, EventEnvelope, EventMessage};
pub use inmemory_bus::InMemoryBus;
#[cfg(feature = "kafka")]
pub use kafka_bus::KafkaBus;
pub use producer::EventProducer;
pub use topics::{is_valid_topic_name, Topic, TopicRegistry};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the envelope's `event_type`
pub const HEADER_EVENT_TYPE: &str = "x-event-type";
/// Header carrying the envelope's `source_service`
pub const HEADER_SOURCE_SERVICE: &str = "x-source-service";
/// Header carrying the envelope's `correlation_id`, when present
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";

/// A message received from the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The topic this message was published to
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Position of the message within its partition
    pub offset: i64,
    /// Partition key (typically the aggregate id)
    pub key: Option<String>,
    /// The message payload (UTF-8 JSON text)
    pub payload: Vec<u8>,
    /// Transport headers
    pub headers: HashMap<String, String>,
}

impl BusMessage {
    /// Look up a transport header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Payload as text, lossy for invalid UTF-8
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// A message handed to the transport for publication
///
/// Created fresh for every publish call and never mutated once handed to
/// [`EventBus::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub headers: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Broker acknowledgement for a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to topic: {0}")]
    SubscribeError(String),

    #[error("failed to consume message: {0}")]
    ConsumeError(String),

    #[error("failed to commit offset: {0}")]
    CommitError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for keyed publish and grouped consumption
///
/// Implementations must be safe to share between tasks: one bus instance
/// serves every producer call in the process, while each consumer gets a
/// dedicated [`ConsumerConnection`] from [`EventBus::connect`].
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message and wait for the broker acknowledgement
    ///
    /// Transport failures are returned as-is; implementations must not retry
    /// on behalf of the caller.
    async fn publish(&self, message: OutboundMessage) -> BusResult<DeliveryReceipt>;

    /// Open a dedicated consumer connection that belongs to `group_id`
    async fn connect(&self, group_id: &str) -> BusResult<Box<dyn ConsumerConnection>>;
}

/// One consumer's exclusive connection to the broker
///
/// A connection is owned by a single consumer loop and never shared.
#[async_trait]
pub trait ConsumerConnection: Send {
    /// Subscribe to exactly one topic
    async fn subscribe(&mut self, topic: &str) -> BusResult<()>;

    /// Wait up to `timeout` for the next message
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message.
    async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>>;

    /// Mark `message` and everything before it in its partition as processed
    ///
    /// The stored offset follows the next-offset convention (`offset + 1`).
    async fn commit(&mut self, message: &BusMessage) -> BusResult<()>;

    /// Move the partition position back to `message` so the next poll
    /// redelivers it
    async fn rewind(&mut self, message: &BusMessage) -> BusResult<()>;

    /// Leave the group and release the connection
    async fn close(&mut self) -> BusResult<()>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

impl fmt::Debug for dyn ConsumerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsumerConnection")
    }
}

/// Build the configured bus implementation
///
/// `inmemory` needs no broker; `kafka` requires the `kafka` feature.
pub fn connect_bus(config: &BusConfig) -> BusResult<Arc<dyn EventBus>> {
    match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Ok(Arc::new(InMemoryBus::new()))
        }
        #[cfg(feature = "kafka")]
        BusType::Kafka => {
            tracing::info!(
                bootstrap_servers = %config.bootstrap_servers,
                client_id = %config.client_id,
                "Using Kafka event bus"
            );
            Ok(Arc::new(KafkaBus::new(config.clone())?))
        }
        #[cfg(not(feature = "kafka"))]
        BusType::Kafka => Err(BusError::ConnectionError(
            "BUS_TYPE=kafka requires the `kafka` feature".to_string(),
        )),
    }
}
