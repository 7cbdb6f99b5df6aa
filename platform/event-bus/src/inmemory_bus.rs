//! In-memory implementation of the EventBus trait for testing and development

use crate::topics::is_valid_topic_name;
use crate::{BusError, BusMessage, BusResult, ConsumerConnection, DeliveryReceipt, EventBus, OutboundMessage};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

const DEFAULT_PARTITIONS: i32 = 3;

/// EventBus implementation backed by in-process partitioned logs
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need fast, isolated message buses
///
/// It keeps the delivery semantics consumers rely on from Kafka:
/// - every topic has a fixed number of partitions, chosen per key with the
///   same murmur2 partitioner Kafka clients use
/// - records are retained, so a new consumer group starts at the earliest one
/// - consumer groups keep committed offsets; partitions are spread over the
///   live members of a group and reassigned when members join or leave
///
/// Topics are created on first use.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus, OutboundMessage};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// bus.publish(OutboundMessage::new("test.events.created", "key-1", "hello")).await?;
///
/// let mut consumer = bus.connect("test-group").await?;
/// consumer.subscribe("test.events.created").await?;
/// let msg = consumer.poll(Duration::from_millis(100)).await?.unwrap();
/// assert_eq!(msg.payload, b"hello");
/// consumer.commit(&msg).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<BrokerState>,
    changed: Notify,
    partitions: i32,
    unavailable: AtomicBool,
    next_member_id: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, GroupState>,
}

#[derive(Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
}

#[derive(Default)]
struct GroupState {
    committed: HashMap<(String, i32), i64>,
    /// member id → subscribed topic
    members: BTreeMap<u64, Option<String>>,
    generation: u64,
}

impl GroupState {
    /// Partitions of `topic` owned by `member_id`
    ///
    /// Members subscribed to the topic are ordered by id; member `i` of `n`
    /// owns every partition `p` with `p % n == i`.
    fn assignment(&self, member_id: u64, topic: &str, partitions: i32) -> Vec<i32> {
        let subscribers: Vec<u64> = self
            .members
            .iter()
            .filter(|(_, subscribed)| subscribed.as_deref() == Some(topic))
            .map(|(id, _)| *id)
            .collect();

        let Some(index) = subscribers.iter().position(|id| *id == member_id) else {
            return Vec::new();
        };

        (0..partitions)
            .filter(|p| (*p as usize) % subscribers.len() == index)
            .collect()
    }
}

impl InMemoryBus {
    /// Create a new in-memory event bus with 3 partitions per topic
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a new in-memory event bus with a custom partition count
    ///
    /// # Arguments
    /// * `partitions` - Partitions created for every topic (at least 1)
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                changed: Notify::new(),
                partitions: partitions.max(1),
                unavailable: AtomicBool::new(false),
                next_member_id: AtomicU64::new(1),
            }),
        }
    }

    /// Simulate a broker outage: publish, connect, poll and commit fail
    /// while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
        self.shared.changed.notify_waiters();
    }

    /// Partition a key is routed to
    pub fn partition_for(&self, key: &str) -> i32 {
        partition_for_key(key, self.shared.partitions)
    }

    /// Next offset the group will read from the partition, if it ever
    /// committed one
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.shared.lock();
        state
            .groups
            .get(group_id)
            .and_then(|group| group.committed.get(&(topic.to_string(), partition)).copied())
    }

    /// Offset the next record appended to the partition will get
    pub fn end_offset(&self, topic: &str, partition: i32) -> i64 {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .map(|log| log.len() as i64)
            .unwrap_or(0)
    }

    /// Every retained record of a topic, partition by partition
    pub fn records(&self, topic: &str) -> Vec<BusMessage> {
        let state = self.shared.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        let records = partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, record)| record.to_message(topic, partition as i32, offset as i64))
            })
            .collect();
        records
    }

    /// Live members of a consumer group
    pub fn group_members(&self, group_id: &str) -> usize {
        let state = self.shared.lock();
        state
            .groups
            .get(group_id)
            .map(|group| group.members.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> bool {
        !self.shared.unavailable.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A panicking test thread must not take the broker down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BrokerState {
    fn ensure_topic(&mut self, topic: &str, partitions: i32) -> &mut Vec<Vec<StoredRecord>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize])
    }
}

impl StoredRecord {
    fn to_message(&self, topic: &str, partition: i32, offset: i64) -> BusMessage {
        BusMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key: Some(self.key.clone()),
            payload: self.payload.clone(),
            headers: self.headers.clone(),
        }
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, message: OutboundMessage) -> BusResult<DeliveryReceipt> {
        if !self.check_available() {
            return Err(BusError::PublishError("broker unavailable".to_string()));
        }
        if !is_valid_topic_name(&message.topic) {
            return Err(BusError::InvalidTopic(message.topic));
        }

        let partition = self.partition_for(&message.key);
        let offset = {
            let mut state = self.shared.lock();
            let log = &mut state.ensure_topic(&message.topic, self.shared.partitions)[partition as usize];
            log.push(StoredRecord {
                key: message.key,
                payload: message.payload.into_bytes(),
                headers: message.headers,
            });
            log.len() as i64 - 1
        };

        self.shared.changed.notify_waiters();

        Ok(DeliveryReceipt {
            topic: message.topic,
            partition,
            offset,
        })
    }

    async fn connect(&self, group_id: &str) -> BusResult<Box<dyn ConsumerConnection>> {
        if !self.check_available() {
            return Err(BusError::ConnectionError("broker unavailable".to_string()));
        }

        let member_id = self.shared.next_member_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.shared.lock();
            state
                .groups
                .entry(group_id.to_string())
                .or_default()
                .members
                .insert(member_id, None);
        }

        Ok(Box::new(InMemoryConsumer {
            shared: self.shared.clone(),
            group_id: group_id.to_string(),
            member_id,
            topic: None,
            generation: 0,
            positions: HashMap::new(),
            next_partition: 0,
            closed: false,
        }))
    }
}

/// A single group member's connection to an [`InMemoryBus`]
///
/// Dropping the connection without [`ConsumerConnection::close`] leaves the
/// group the same way a crashed Kafka client does once its session expires:
/// its partitions move to the remaining members, which resume from the last
/// committed offsets.
struct InMemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    member_id: u64,
    topic: Option<String>,
    generation: u64,
    /// partition → next offset to read
    positions: HashMap<i32, i64>,
    next_partition: usize,
    closed: bool,
}

impl InMemoryConsumer {
    fn try_fetch(&mut self, topic: &str) -> Option<BusMessage> {
        let state = self.shared.lock();
        let group = state.groups.get(&self.group_id)?;

        if group.generation != self.generation {
            // Rebalance: forget positions, resume from committed offsets
            self.positions.clear();
            self.generation = group.generation;
        }

        let assigned = group.assignment(self.member_id, topic, self.shared.partitions);
        if assigned.is_empty() {
            return None;
        }

        let logs = state.topics.get(topic)?;
        for step in 0..assigned.len() {
            let slot = (self.next_partition + step) % assigned.len();
            let partition = assigned[slot];

            let position = *self.positions.entry(partition).or_insert_with(|| {
                group
                    .committed
                    .get(&(topic.to_string(), partition))
                    .copied()
                    .unwrap_or(0)
            });

            if let Some(record) = logs
                .get(partition as usize)
                .and_then(|log| log.get(position as usize))
            {
                self.positions.insert(partition, position + 1);
                self.next_partition = (slot + 1) % assigned.len();
                return Some(record.to_message(topic, partition, position));
            }
        }

        None
    }

    fn leave_group(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        {
            let mut state = self.shared.lock();
            if let Some(group) = state.groups.get_mut(&self.group_id) {
                let was_subscribed = matches!(group.members.remove(&self.member_id), Some(Some(_)));
                if was_subscribed {
                    group.generation += 1;
                }
            }
        }

        self.shared.changed.notify_waiters();
    }
}

#[async_trait]
impl ConsumerConnection for InMemoryConsumer {
    async fn subscribe(&mut self, topic: &str) -> BusResult<()> {
        if self.closed {
            return Err(BusError::SubscribeError("connection closed".to_string()));
        }
        if let Some(current) = &self.topic {
            return Err(BusError::SubscribeError(format!(
                "already subscribed to {current}"
            )));
        }
        if !is_valid_topic_name(topic) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }

        {
            let mut state = self.shared.lock();
            state.ensure_topic(topic, self.shared.partitions);
            let group = state.groups.entry(self.group_id.clone()).or_default();
            group.members.insert(self.member_id, Some(topic.to_string()));
            group.generation += 1;
        }

        self.topic = Some(topic.to_string());
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>> {
        if self.closed {
            return Err(BusError::ConsumeError("connection closed".to_string()));
        }
        let topic = self
            .topic
            .clone()
            .ok_or_else(|| BusError::ConsumeError("not subscribed".to_string()))?;

        let shared = self.shared.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wake-ups before looking, so a publish in between
            // is not missed
            let changed = shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if shared.unavailable.load(Ordering::SeqCst) {
                return Err(BusError::ConsumeError("broker unavailable".to_string()));
            }

            if let Some(message) = self.try_fetch(&topic) {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, message: &BusMessage) -> BusResult<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::CommitError("broker unavailable".to_string()));
        }

        let mut state = self.shared.lock();
        let group = state
            .groups
            .get_mut(&self.group_id)
            .ok_or_else(|| BusError::CommitError(format!("unknown group {}", self.group_id)))?;
        group
            .committed
            .insert((message.topic.clone(), message.partition), message.offset + 1);
        Ok(())
    }

    async fn rewind(&mut self, message: &BusMessage) -> BusResult<()> {
        if let Some(position) = self.positions.get_mut(&message.partition) {
            *position = message.offset;
        }
        Ok(())
    }

    async fn close(&mut self) -> BusResult<()> {
        self.leave_group();
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.leave_group();
    }
}

/// Kafka's default partitioner: `murmur2(key) & 0x7fffffff % partitions`
fn partition_for_key(key: &str, partitions: i32) -> i32 {
    ((murmur2(key.as_bytes()) & 0x7fff_ffff) as i32) % partitions
}

/// 32-bit murmur2 with the seed used by the Kafka Java client
fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let length = data.len();
    let mut h: u32 = SEED ^ (length as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(200);

    async fn publish(bus: &InMemoryBus, topic: &str, key: &str, payload: &str) -> DeliveryReceipt {
        bus.publish(OutboundMessage::new(topic, key, payload))
            .await
            .unwrap()
    }

    #[test]
    fn test_partitioner_is_stable_and_in_range() {
        for key in ["a", "shipment-1", "3f2b7f1c-0000-4000-8000-000000000000", ""] {
            let p = partition_for_key(key, 3);
            assert!((0..3).contains(&p));
            assert_eq!(p, partition_for_key(key, 3));
        }
    }

    #[test]
    fn test_partitioner_spreads_keys() {
        let used: std::collections::HashSet<i32> = (0..100)
            .map(|i| partition_for_key(&format!("key-{i}"), 3))
            .collect();
        assert_eq!(used.len(), 3);
    }

    #[tokio::test]
    async fn test_publish_returns_increasing_offsets_per_partition() {
        let bus = InMemoryBus::new();
        let first = publish(&bus, "test.events", "k1", "a").await;
        let second = publish(&bus, "test.events", "k1", "b").await;

        assert_eq!(first.partition, second.partition);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(bus.end_offset("test.events", first.partition), 2);
    }

    #[tokio::test]
    async fn test_new_group_starts_at_earliest() {
        let bus = InMemoryBus::with_partitions(1);
        publish(&bus, "test.events", "k", "before-subscribe").await;

        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();

        let msg = consumer.poll(POLL).await.unwrap().expect("message");
        assert_eq!(msg.payload, b"before-subscribe");
        assert_eq!(msg.offset, 0);
        assert_eq!(msg.key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_poll_times_out_without_messages() {
        let bus = InMemoryBus::new();
        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();

        assert!(consumer.poll(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let bus = InMemoryBus::new();
        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publish(&publisher, "test.events", "k", "late").await;
        });

        let msg = consumer.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(msg.expect("message").payload, b"late");
    }

    #[tokio::test]
    async fn test_same_key_preserves_order() {
        let bus = InMemoryBus::new();
        for i in 0..5 {
            publish(&bus, "test.events", "aggregate-1", &format!("m{i}")).await;
        }

        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();

        for i in 0..5 {
            let msg = consumer.poll(POLL).await.unwrap().expect("message");
            assert_eq!(msg.payload, format!("m{i}").into_bytes());
            assert_eq!(msg.offset, i);
            consumer.commit(&msg).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_commit_uses_next_offset() {
        let bus = InMemoryBus::with_partitions(1);
        publish(&bus, "test.events", "k", "a").await;

        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();
        let msg = consumer.poll(POLL).await.unwrap().unwrap();

        assert_eq!(bus.committed_offset("g", "test.events", 0), None);
        consumer.commit(&msg).await.unwrap();
        assert_eq!(bus.committed_offset("g", "test.events", 0), Some(1));
    }

    #[tokio::test]
    async fn test_uncommitted_message_redelivered_after_reconnect() {
        let bus = InMemoryBus::with_partitions(1);
        publish(&bus, "test.events", "k", "a").await;
        publish(&bus, "test.events", "k", "b").await;

        {
            let mut consumer = bus.connect("g").await.unwrap();
            consumer.subscribe("test.events").await.unwrap();
            let a = consumer.poll(POLL).await.unwrap().unwrap();
            consumer.commit(&a).await.unwrap();
            // "b" is read but never committed before the connection dies
            let b = consumer.poll(POLL).await.unwrap().unwrap();
            assert_eq!(b.payload, b"b");
        }

        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();
        let again = consumer.poll(POLL).await.unwrap().unwrap();
        assert_eq!(again.payload, b"b");
        assert_eq!(again.offset, 1);
    }

    #[tokio::test]
    async fn test_rewind_redelivers_on_next_poll() {
        let bus = InMemoryBus::with_partitions(1);
        publish(&bus, "test.events", "k", "a").await;
        publish(&bus, "test.events", "k", "b").await;

        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();

        let a = consumer.poll(POLL).await.unwrap().unwrap();
        consumer.rewind(&a).await.unwrap();
        let again = consumer.poll(POLL).await.unwrap().unwrap();
        assert_eq!(again, a);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let bus = InMemoryBus::with_partitions(1);
        publish(&bus, "test.events", "k", "a").await;

        for group in ["g1", "g2"] {
            let mut consumer = bus.connect(group).await.unwrap();
            consumer.subscribe("test.events").await.unwrap();
            let msg = consumer.poll(POLL).await.unwrap().unwrap();
            consumer.commit(&msg).await.unwrap();
        }

        assert_eq!(bus.committed_offset("g1", "test.events", 0), Some(1));
        assert_eq!(bus.committed_offset("g2", "test.events", 0), Some(1));
    }

    #[tokio::test]
    async fn test_group_members_split_partitions() {
        let bus = InMemoryBus::with_partitions(4);
        let mut first = bus.connect("g").await.unwrap();
        first.subscribe("test.events").await.unwrap();
        let mut second = bus.connect("g").await.unwrap();
        second.subscribe("test.events").await.unwrap();

        for i in 0..40 {
            publish(&bus, "test.events", &format!("key-{i}"), "x").await;
        }

        let mut seen_first = std::collections::HashSet::new();
        while let Some(msg) = first.poll(Duration::from_millis(20)).await.unwrap() {
            seen_first.insert(msg.partition);
        }
        let mut seen_second = std::collections::HashSet::new();
        while let Some(msg) = second.poll(Duration::from_millis(20)).await.unwrap() {
            seen_second.insert(msg.partition);
        }

        assert!(!seen_first.is_empty());
        assert!(!seen_second.is_empty());
        assert!(seen_first.is_disjoint(&seen_second));
    }

    #[tokio::test]
    async fn test_partitions_move_when_member_leaves() {
        let bus = InMemoryBus::with_partitions(2);
        let mut first = bus.connect("g").await.unwrap();
        first.subscribe("test.events").await.unwrap();
        let mut second = bus.connect("g").await.unwrap();
        second.subscribe("test.events").await.unwrap();
        assert_eq!(bus.group_members("g"), 2);

        second.close().await.unwrap();
        assert_eq!(bus.group_members("g"), 1);

        for i in 0..20 {
            publish(&bus, "test.events", &format!("key-{i}"), "x").await;
        }

        let mut partitions = std::collections::HashSet::new();
        while let Some(msg) = first.poll(Duration::from_millis(20)).await.unwrap() {
            partitions.insert(msg.partition);
        }
        assert_eq!(partitions.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_broker() {
        let bus = InMemoryBus::new();
        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.events").await.unwrap();

        bus.set_unavailable(true);
        assert!(matches!(
            bus.publish(OutboundMessage::new("test.events", "k", "x")).await,
            Err(BusError::PublishError(_))
        ));
        assert!(matches!(consumer.poll(POLL).await, Err(BusError::ConsumeError(_))));
        assert!(matches!(bus.connect("g2").await, Err(BusError::ConnectionError(_))));

        bus.set_unavailable(false);
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_rejected() {
        let bus = InMemoryBus::new();
        let mut consumer = bus.connect("g").await.unwrap();
        consumer.subscribe("test.a").await.unwrap();
        assert!(matches!(
            consumer.subscribe("test.b").await,
            Err(BusError::SubscribeError(_))
        ));
    }

    #[tokio::test]
    async fn test_records_inspection() {
        let bus = InMemoryBus::with_partitions(1);
        publish(&bus, "test.events", "k", "a").await;
        publish(&bus, "test.events", "k", "b").await;

        let records = bus.records("test.events");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].offset, 1);
        assert!(bus.records("missing.topic").is_empty());
    }
}
