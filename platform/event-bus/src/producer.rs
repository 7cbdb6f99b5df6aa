//! Keyed producer on top of an [`EventBus`]

use crate::codec::encode_payload;
use crate::topics::is_valid_topic_name;
use crate::{BusError, BusResult, DeliveryReceipt, EventBus, EventEnvelope, OutboundMessage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Publishes keyed messages to topics
///
/// One instance per process is expected; it is cheap to clone and safe to use
/// from many tasks at once. Publishing waits for the broker acknowledgement
/// and never retries: a transport failure is returned to the caller, who
/// decides whether to publish again.
#[derive(Clone)]
pub struct EventProducer {
    bus: Arc<dyn EventBus>,
}

impl EventProducer {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish pre-serialized JSON text
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: impl Into<String>,
        headers: Option<HashMap<String, String>>,
    ) -> BusResult<DeliveryReceipt> {
        if !is_valid_topic_name(topic) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }

        let message = OutboundMessage::new(topic, key, payload).with_headers(headers.unwrap_or_default());

        match self.bus.publish(message).await {
            Ok(receipt) => {
                debug!(
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    key = %key,
                    "Message acknowledged by broker"
                );
                Ok(receipt)
            }
            Err(e) => {
                error!(topic = %topic, key = %key, error = %e, "Failed to publish message");
                Err(e)
            }
        }
    }

    /// Serialize `message` as JSON and publish it
    ///
    /// Only `headers` travel with the message. An [`EventEnvelope`] sent
    /// through here gets no `x-event-type`, `x-source-service` or
    /// `x-correlation-id`; publish envelopes with
    /// [`produce_event`](Self::produce_event) instead.
    pub async fn produce<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        message: &T,
        headers: Option<HashMap<String, String>>,
    ) -> BusResult<DeliveryReceipt> {
        let payload = encode_payload(message)?;
        self.publish(topic, key, payload, headers).await
    }

    /// Publish an enveloped event
    ///
    /// Adds `x-event-type`, `x-source-service` and (when set)
    /// `x-correlation-id` from the envelope. Headers supplied by the caller
    /// take precedence over derived ones.
    pub async fn produce_event<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope<T>,
        headers: Option<HashMap<String, String>>,
    ) -> BusResult<DeliveryReceipt> {
        envelope.validate().map_err(BusError::InvalidEnvelope)?;

        let mut headers = headers.unwrap_or_default();
        for (name, value) in envelope.derived_headers() {
            headers.entry(name.to_string()).or_insert(value);
        }

        self.produce(topic, key, envelope, Some(headers)).await
    }
}
