//! Kafka-based implementation of the EventBus trait

use crate::{
    BusConfig, BusError, BusMessage, BusResult, ConsumerConnection, DeliveryReceipt, EventBus,
    OutboundMessage,
};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// EventBus implementation using Kafka
///
/// This is the production implementation. Publishing goes through one shared
/// `FutureProducer` (`acks=all`, idempotence on). Every call to
/// [`EventBus::connect`] creates a new `StreamConsumer` with manual commits
/// and `auto.offset.reset=earliest`, so each consumer runtime owns its broker
/// connection.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{BusConfig, BusType, EventBus, KafkaBus, OutboundMessage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BusConfig {
///     bus_type: BusType::Kafka,
///     bootstrap_servers: "localhost:9092".to_string(),
///     ..BusConfig::default()
/// };
/// let bus = KafkaBus::new(config)?;
///
/// bus.publish(OutboundMessage::new("my.topic", "key-1", "{}")).await?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaBus {
    config: BusConfig,
    producer: FutureProducer,
}

impl KafkaBus {
    /// Create the shared producer
    ///
    /// Consumers are created lazily by [`EventBus::connect`].
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let producer: FutureProducer = client_config(&config)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set(
                "message.timeout.ms",
                config.publish_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| BusError::ConnectionError(format!("failed to create producer: {e}")))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Kafka producer initialized"
        );

        Ok(Self { config, producer })
    }
}

/// Connection settings shared by producer and consumers
fn client_config(config: &BusConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("client.id", &config.client_id);

    if let Some(protocol) = &config.security_protocol {
        client_config.set("security.protocol", protocol);
    }

    if let (Some(mechanism), Some(username), Some(password)) = (
        &config.sasl_mechanism,
        &config.sasl_username,
        &config.sasl_password,
    ) {
        info!(sasl_mechanism = %mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client_config
}

#[async_trait]
impl EventBus for KafkaBus {
    async fn publish(&self, message: OutboundMessage) -> BusResult<DeliveryReceipt> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &message.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(&message.topic)
            .key(message.key.as_str())
            .payload(message.payload.as_str())
            .headers(headers);

        match self
            .producer
            .send(record, Timeout::After(self.config.publish_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(DeliveryReceipt {
                topic: message.topic.clone(),
                partition,
                offset,
            }),
            Err((e, _)) => Err(BusError::PublishError(e.to_string())),
        }
    }

    async fn connect(&self, group_id: &str) -> BusResult<Box<dyn ConsumerConnection>> {
        let consumer: StreamConsumer = client_config(&self.config)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| BusError::ConnectionError(format!("failed to create consumer: {e}")))?;

        debug!(group_id = %group_id, "Kafka consumer created");

        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
}

fn to_bus_message(message: &BorrowedMessage<'_>) -> BusMessage {
    let headers: HashMap<String, String> = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    header.value.map(|value| {
                        (
                            header.key.to_string(),
                            String::from_utf8_lossy(value).into_owned(),
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    BusMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}

#[async_trait]
impl ConsumerConnection for KafkaConsumer {
    async fn subscribe(&mut self, topic: &str) -> BusResult<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::SubscribeError(e.to_string()))
    }

    async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_bus_message(&message))),
            Ok(Err(e)) => Err(BusError::ConsumeError(e.to_string())),
        }
    }

    async fn commit(&mut self, message: &BusMessage) -> BusResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| BusError::CommitError(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| BusError::CommitError(e.to_string()))
    }

    async fn rewind(&mut self, message: &BusMessage) -> BusResult<()> {
        self.consumer
            .seek(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| BusError::ConsumeError(format!("seek failed: {e}")))
    }

    async fn close(&mut self) -> BusResult<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}
