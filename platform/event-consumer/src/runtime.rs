//! Consumer runtime
//!
//! One runtime is one long-lived task bound to a single (message type, topic)
//! pair. It owns a dedicated broker connection and runs the loop
//!
//! ```text
//! Starting → Subscribed → { Polling ⇄ Handling } → Draining → Stopped
//!                               ↘ Error ↗
//! ```
//!
//! Offsets are committed only after the handler succeeded. A failed message
//! is rewound so the next poll of its partition redelivers it; a message that
//! cannot be decoded is skipped without a commit. Neither ever ends the loop:
//! only the shutdown signal, or a failure to connect or subscribe at start,
//! stops a runtime.

use crate::dispatch::MessageDispatcher;
use crate::{ConsumerError, ShutdownSignal};
use event_bus::consumer_retry::{retry_with_backoff, Backoff, RetryConfig};
use event_bus::{BusMessage, ConsumerConnection, DeliveryReceipt, EventBus, EventProducer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Header naming the topic a dead-lettered message came from
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";
pub const HEADER_ORIGINAL_PARTITION: &str = "x-original-partition";
pub const HEADER_ORIGINAL_OFFSET: &str = "x-original-offset";
pub const HEADER_FAILURE_REASON: &str = "x-failure-reason";
pub const HEADER_ATTEMPTS: &str = "x-attempts";

/// Observable lifecycle of a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Starting,
    Subscribed,
    Polling,
    Handling,
    /// Transport or handling error; the loop backs off and polls again
    Error,
    Draining,
    Stopped,
}

/// Forward poison messages to a dead-letter topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Handler failures on the same offset before the message is forwarded
    pub max_attempts: u32,
    /// Destination topic
    pub topic: String,
}

impl DeadLetterPolicy {
    /// Forward after `max_attempts` failures to the default `dlq-events` topic
    pub fn after(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            topic: event_bus::Topic::DeadLetter.default_name().to_string(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// Settings shared by every runtime of a process
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Prefix of every consumer-group id
    pub client_id: String,
    /// Longest single wait for a message
    pub poll_timeout: Duration,
    /// Pause between transport errors and between redeliveries; also bounds
    /// dead-letter forwarding retries
    pub backoff: RetryConfig,
    /// `None` keeps failing messages in place forever
    pub dead_letter: Option<DeadLetterPolicy>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            client_id: "pegasus-client".to_string(),
            poll_timeout: Duration::from_millis(1000),
            backoff: RetryConfig::default(),
            dead_letter: None,
        }
    }
}

/// Consumer-group id for a message type: `{client}-{type}-consumer`, lowercased type
pub fn consumer_group_id(client_id: &str, message_type: &str) -> String {
    format!("{}-{}-consumer", client_id, message_type.to_lowercase())
}

/// Failure count per partition, for the message currently at its head
#[derive(Debug, Default)]
struct Attempts {
    by_partition: HashMap<(String, i32), (i64, u32)>,
}

impl Attempts {
    fn record_failure(&mut self, message: &BusMessage) -> u32 {
        let entry = self
            .by_partition
            .entry((message.topic.clone(), message.partition))
            .or_insert((message.offset, 0));
        if entry.0 != message.offset {
            *entry = (message.offset, 0);
        }
        entry.1 += 1;
        entry.1
    }

    fn clear(&mut self, message: &BusMessage) {
        self.by_partition
            .remove(&(message.topic.clone(), message.partition));
    }
}

enum Outcome {
    /// Move on to the next message
    Done,
    /// The message was rewound; pause before polling it again
    Redeliver,
}

/// Long-lived consumer bound to one topic and one message type
pub struct ConsumerRuntime {
    bus: Arc<dyn EventBus>,
    topic: String,
    dispatcher: Arc<dyn MessageDispatcher>,
    settings: ConsumerSettings,
    dead_letters: EventProducer,
    state: watch::Sender<RuntimeState>,
}

impl ConsumerRuntime {
    pub fn new(
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        dispatcher: Arc<dyn MessageDispatcher>,
        settings: ConsumerSettings,
    ) -> Self {
        let (state, _) = watch::channel(RuntimeState::Starting);
        Self {
            dead_letters: EventProducer::new(bus.clone()),
            bus,
            topic: topic.into(),
            dispatcher,
            settings,
            state,
        }
    }

    pub fn group_id(&self) -> String {
        consumer_group_id(&self.settings.client_id, self.dispatcher.message_type())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Watch the runtime's lifecycle
    pub fn state(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RuntimeState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(topic = %self.topic, ?previous, ?state, "Consumer state changed");
        }
    }

    /// Run until `shutdown` fires
    ///
    /// Returns an error only when the connection cannot be opened or the
    /// subscription fails; per-message errors never end the loop.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ConsumerError> {
        let group_id = self.group_id();
        self.set_state(RuntimeState::Starting);

        let mut connection = match self.bus.connect(&group_id).await {
            Ok(connection) => connection,
            Err(source) => {
                error!(group_id = %group_id, error = %source, "Failed to create consumer");
                self.set_state(RuntimeState::Stopped);
                return Err(ConsumerError::Connect { group_id, source });
            }
        };

        if let Err(source) = connection.subscribe(&self.topic).await {
            error!(topic = %self.topic, group_id = %group_id, error = %source, "Failed to subscribe");
            self.close(connection.as_mut()).await;
            self.set_state(RuntimeState::Stopped);
            return Err(ConsumerError::Subscribe {
                topic: self.topic.clone(),
                source,
            });
        }

        self.set_state(RuntimeState::Subscribed);
        info!(topic = %self.topic, group_id = %group_id, "Consumer subscribed");

        self.consume(connection.as_mut(), &shutdown).await;

        self.set_state(RuntimeState::Draining);
        self.close(connection.as_mut()).await;
        self.set_state(RuntimeState::Stopped);
        info!(topic = %self.topic, group_id = %group_id, "Consumer stopped");

        Ok(())
    }

    async fn close(&self, connection: &mut dyn ConsumerConnection) {
        if let Err(e) = connection.close().await {
            warn!(topic = %self.topic, error = %e, "Failed to close consumer connection");
        }
    }

    async fn consume(&self, connection: &mut dyn ConsumerConnection, shutdown: &ShutdownSignal) {
        let mut backoff = Backoff::new(&self.settings.backoff);
        let mut attempts = Attempts::default();

        while !shutdown.is_triggered() {
            self.set_state(RuntimeState::Polling);

            let polled = tokio::select! {
                _ = shutdown.triggered() => break,
                polled = connection.poll(self.settings.poll_timeout) => polled,
            };

            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    self.set_state(RuntimeState::Error);
                    let delay = backoff.next_delay();
                    warn!(
                        topic = %self.topic,
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "Error consuming message"
                    );
                    if !pause(delay, shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(RuntimeState::Handling);
            let span = tracing::info_span!(
                "consume_message",
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                key = %message.key.as_deref().unwrap_or(""),
                message_type = self.dispatcher.message_type(),
            );

            let outcome = self
                .handle(connection, &message, shutdown, &mut attempts)
                .instrument(span)
                .await;

            match outcome {
                Outcome::Done => backoff.reset(),
                Outcome::Redeliver => {
                    if !pause(backoff.next_delay(), shutdown).await {
                        break;
                    }
                }
            }
        }
    }

    async fn handle(
        &self,
        connection: &mut dyn ConsumerConnection,
        message: &BusMessage,
        shutdown: &ShutdownSignal,
        attempts: &mut Attempts,
    ) -> Outcome {
        let err = match self.dispatcher.dispatch(&message.payload, shutdown).await {
            Ok(()) => {
                attempts.clear(message);
                self.commit(connection, message).await;
                return Outcome::Done;
            }
            Err(err) => err,
        };

        self.set_state(RuntimeState::Error);

        if err.is_decode() {
            error!(error = %err, "Failed to deserialize message, skipping");
            return match &self.settings.dead_letter {
                Some(policy) => {
                    self.forward_to_dead_letter(connection, message, policy, &err.to_string(), 1)
                        .await
                }
                None => Outcome::Done,
            };
        }

        let attempt = attempts.record_failure(message);
        error!(error = %err, attempt = attempt, "Error handling message; it will be redelivered");

        if let Some(policy) = &self.settings.dead_letter {
            if attempt >= policy.max_attempts {
                let outcome = self
                    .forward_to_dead_letter(connection, message, policy, &err.to_string(), attempt)
                    .await;
                if let Outcome::Done = outcome {
                    attempts.clear(message);
                }
                return outcome;
            }
        }

        self.rewind(connection, message).await;
        Outcome::Redeliver
    }

    async fn commit(&self, connection: &mut dyn ConsumerConnection, message: &BusMessage) {
        match connection.commit(message).await {
            Ok(()) => debug!("Offset committed"),
            // Redelivery after a restart is a duplicate, never a loss
            Err(e) => warn!(error = %e, "Failed to commit offset"),
        }
    }

    async fn rewind(&self, connection: &mut dyn ConsumerConnection, message: &BusMessage) {
        if let Err(e) = connection.rewind(message).await {
            warn!(error = %e, "Failed to rewind partition; message is redelivered after rebalance or restart");
        }
    }

    async fn forward_to_dead_letter(
        &self,
        connection: &mut dyn ConsumerConnection,
        message: &BusMessage,
        policy: &DeadLetterPolicy,
        reason: &str,
        attempts: u32,
    ) -> Outcome {
        match self.publish_dead_letter(message, policy, reason, attempts).await {
            Ok(receipt) => {
                warn!(
                    dead_letter_topic = %receipt.topic,
                    dead_letter_offset = receipt.offset,
                    attempts = attempts,
                    "Message forwarded to dead-letter topic"
                );
                self.commit(connection, message).await;
                Outcome::Done
            }
            Err(e) => {
                error!(
                    dead_letter_topic = %policy.topic,
                    error = %e,
                    "Failed to forward message to dead-letter topic; it will be redelivered"
                );
                self.rewind(connection, message).await;
                Outcome::Redeliver
            }
        }
    }

    async fn publish_dead_letter(
        &self,
        message: &BusMessage,
        policy: &DeadLetterPolicy,
        reason: &str,
        attempts: u32,
    ) -> event_bus::BusResult<DeliveryReceipt> {
        let mut headers = message.headers.clone();
        headers.insert(HEADER_ORIGINAL_TOPIC.to_string(), message.topic.clone());
        headers.insert(HEADER_ORIGINAL_PARTITION.to_string(), message.partition.to_string());
        headers.insert(HEADER_ORIGINAL_OFFSET.to_string(), message.offset.to_string());
        headers.insert(HEADER_FAILURE_REASON.to_string(), reason.to_string());
        headers.insert(HEADER_ATTEMPTS.to_string(), attempts.to_string());

        let payload = message.payload_text().into_owned();
        let key = message.key.as_deref().unwrap_or("");
        let topic = policy.topic.as_str();
        let producer = &self.dead_letters;

        retry_with_backoff(
            move || {
                let headers = headers.clone();
                let payload = payload.clone();
                async move { producer.publish(topic, key, payload, Some(headers)).await }
            },
            &self.settings.backoff,
            "dead_letter_forward",
        )
        .await
    }
}

/// Sleep for `delay` unless shutdown fires first; `false` means shutdown
async fn pause(delay: Duration, shutdown: &ShutdownSignal) -> bool {
    tokio::select! {
        _ = shutdown.triggered() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
