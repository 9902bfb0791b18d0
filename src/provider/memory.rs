//! In-memory broker
//!
//! Reproduces the JetStream delivery contract inside one process: streams
//! capture subjects, durable consumers keep a cursor shared by a queue
//! group, every delivery must be acked within `ack_wait` or it is handed to
//! the next member, and `max_deliver` bounds the number of attempts.

use super::{subject_matches, Broker, PendingDelivery, StreamLookup, Subscription};
use crate::error::{EventError, Result};
use crate::types::{
    Delivery, DeliveryReceipt, PublishOptions, RetentionPolicy, StreamDescriptor, StreamInfo,
    SubscribeOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

type Shared = Arc<Mutex<State>>;

/// In-memory broker for tests and single-process use
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Shared,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
    create_calls: usize,
    next_member_id: u64,
    closed: bool,
}

struct StreamState {
    descriptor: StreamDescriptor,
    messages: Vec<StoredMessage>,
    last_sequence: u64,
    /// Recent publish ids, pruned once older than the duplicate window
    dedup: HashMap<String, (u64, Instant)>,
    consumers: HashMap<String, ConsumerState>,
}

struct StoredMessage {
    sequence: u64,
    subject: String,
    payload: Bytes,
    stored_at: Instant,
}

struct ConsumerState {
    filter_subject: String,
    queue_group: String,
    max_deliver: i64,
    ack_wait: Duration,
    /// Highest stream sequence handed to a member
    cursor: u64,
    /// Unacked sequences and the attempt currently outstanding
    pending: HashMap<u64, u64>,
    members: Vec<Member>,
    next_member: usize,
}

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<PendingDelivery>,
}

/// A delivery attempt whose ack deadline is being watched
struct AckTimer {
    stream: String,
    consumer: String,
    sequence: u64,
    num_delivered: u64,
    after: Duration,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stream creation calls received, successful or not
    pub async fn create_stream_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }

    /// Number of unacknowledged messages on a durable consumer
    pub async fn pending_acks(&self, stream: &str, durable_name: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .and_then(|s| s.consumers.get(durable_name))
            .map(|c| c.pending.len())
    }

    /// Number of messages currently stored in a stream
    pub async fn stream_len(&self, stream: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.streams.get(stream).map(|s| s.messages.len())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn stream_info(&self, name: &str) -> StreamLookup {
        let state = self.state.lock().await;
        if state.closed {
            return StreamLookup::Failed(EventError::Closed);
        }
        match state.streams.get(name) {
            Some(stream) => StreamLookup::Found(stream.info()),
            None => StreamLookup::NotFound,
        }
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamInfo> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(EventError::Closed);
        }
        state.create_calls += 1;

        let provisioning = |reason: &str| EventError::Provisioning {
            stream: descriptor.name.clone(),
            reason: reason.to_string(),
        };

        if descriptor.name.is_empty()
            || descriptor
                .name
                .contains(|c: char| c == '.' || c == '*' || c == '>' || c.is_whitespace())
        {
            return Err(provisioning("invalid stream name"));
        }
        if descriptor.subjects.is_empty() {
            return Err(provisioning("stream requires at least one subject"));
        }

        if let Some(existing) = state.streams.get(&descriptor.name) {
            if existing.descriptor == *descriptor {
                return Ok(existing.info());
            }
            return Err(provisioning("stream name already in use with a different configuration"));
        }

        let overlaps = state.streams.values().any(|s| {
            s.descriptor.subjects.iter().any(|theirs| {
                descriptor
                    .subjects
                    .iter()
                    .any(|ours| subject_matches(theirs, ours) || subject_matches(ours, theirs))
            })
        });
        if overlaps {
            return Err(provisioning("subjects overlap with an existing stream"));
        }

        let stream = StreamState {
            descriptor: descriptor.clone(),
            messages: Vec::new(),
            last_sequence: 0,
            dedup: HashMap::new(),
            consumers: HashMap::new(),
        };
        let info = stream.info();
        state.streams.insert(descriptor.name.clone(), stream);

        tracing::debug!(stream = %descriptor.name, "Memory stream created");
        Ok(info)
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: &PublishOptions,
    ) -> Result<DeliveryReceipt> {
        let mut timers = Vec::new();
        let receipt = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(EventError::Closed);
            }

            let Some((name, stream)) = state
                .streams
                .iter_mut()
                .find(|(_, s)| s.descriptor.subjects.iter().any(|p| subject_matches(p, subject)))
            else {
                return Err(EventError::Publish {
                    subject: subject.to_string(),
                    reason: "no stream matches subject".to_string(),
                });
            };
            let name = name.clone();

            let window = stream.descriptor.duplicate_window();
            stream.dedup.retain(|_, (_, seen)| seen.elapsed() < window);

            if let Some((seq, _)) = opts.msg_id.as_ref().and_then(|id| stream.dedup.get(id)) {
                return Ok(DeliveryReceipt {
                    stream: name,
                    sequence: *seq,
                    duplicate: true,
                });
            }

            stream.last_sequence += 1;
            let sequence = stream.last_sequence;
            if let Some(ref id) = opts.msg_id {
                stream.dedup.insert(id.clone(), (sequence, Instant::now()));
            }
            stream.messages.push(StoredMessage {
                sequence,
                subject: subject.to_string(),
                payload,
                stored_at: Instant::now(),
            });
            stream.enforce_limits();

            let consumers: Vec<String> = stream.consumers.keys().cloned().collect();
            for consumer in consumers {
                timers.extend(pump(&self.state, &name, stream, &consumer));
            }

            DeliveryReceipt {
                stream: name,
                sequence,
                duplicate: false,
            }
        };

        for timer in timers {
            arm(self.state.clone(), timer);
        }
        Ok(receipt)
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        let subscribe_err = |reason: String| EventError::Subscribe {
            subject: subject.to_string(),
            reason,
        };

        let (rx, member_id, stream_name, timers) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(EventError::Closed);
            }
            state.next_member_id += 1;
            let member_id = state.next_member_id;

            let Some((name, stream)) = state.streams.iter_mut().find(|(_, s)| {
                s.descriptor
                    .subjects
                    .iter()
                    .any(|p| subject_matches(p, subject))
            }) else {
                return Err(subscribe_err("no stream matches subject".to_string()));
            };
            let name = name.clone();

            let consumer = stream
                .consumers
                .entry(opts.durable_name.clone())
                .or_insert_with(|| ConsumerState {
                    filter_subject: subject.to_string(),
                    queue_group: opts.queue_group.clone(),
                    max_deliver: opts.max_deliver,
                    ack_wait: opts.ack_wait,
                    cursor: 0,
                    pending: HashMap::new(),
                    members: Vec::new(),
                    next_member: 0,
                });

            if consumer.filter_subject != subject {
                return Err(subscribe_err(format!(
                    "durable '{}' is bound to subject '{}'",
                    opts.durable_name, consumer.filter_subject
                )));
            }
            if consumer.queue_group != opts.queue_group {
                return Err(subscribe_err(format!(
                    "durable '{}' is bound to queue group '{}'",
                    opts.durable_name, consumer.queue_group
                )));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            consumer.members.push(Member { id: member_id, tx });

            let timers = pump(&self.state, &name, stream, &opts.durable_name);
            (rx, member_id, name, timers)
        };

        for timer in timers {
            arm(self.state.clone(), timer);
        }

        tracing::debug!(
            stream = %stream_name,
            durable = %opts.durable_name,
            queue = %opts.queue_group,
            member = member_id,
            "Memory queue subscription created"
        );

        Ok(Box::new(MemorySubscription {
            rx,
            member_id,
            state: self.state.clone(),
            stream: stream_name,
            durable_name: opts.durable_name.clone(),
        }))
    }

    async fn drain(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        for stream in state.streams.values_mut() {
            for consumer in stream.consumers.values_mut() {
                consumer.members.clear();
            }
        }
        tracing::debug!("Memory broker drained");
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl StreamState {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            name: self.descriptor.name.clone(),
            subjects: self.descriptor.subjects.clone(),
            messages: self.messages.len() as u64,
            consumer_count: self.consumers.len(),
        }
    }

    fn enforce_limits(&mut self) {
        let max_age = self.descriptor.max_age();
        if !max_age.is_zero() {
            self.messages.retain(|m| m.stored_at.elapsed() < max_age);
        }
        if self.descriptor.max_messages >= 0 {
            let max = self.descriptor.max_messages as usize;
            if self.messages.len() > max {
                let excess = self.messages.len() - max;
                self.messages.drain(..excess);
            }
        }
    }
}

impl ConsumerState {
    /// Send to the next live member in round-robin order
    fn send(&mut self, mut build: impl FnMut() -> PendingDelivery) -> bool {
        while !self.members.is_empty() {
            let idx = self.next_member % self.members.len();
            match self.members[idx].tx.send(build()) {
                Ok(()) => {
                    self.next_member = idx + 1;
                    return true;
                }
                Err(_) => {
                    self.members.remove(idx);
                }
            }
        }
        false
    }
}

/// Hand every undelivered matching message to the consumer's members
fn pump(
    shared: &Shared,
    stream_name: &str,
    stream: &mut StreamState,
    consumer_name: &str,
) -> Vec<AckTimer> {
    let StreamState {
        messages,
        consumers,
        ..
    } = stream;
    let Some(consumer) = consumers.get_mut(consumer_name) else {
        return Vec::new();
    };

    let mut timers = Vec::new();
    let start = consumer.cursor;
    for msg in messages.iter().filter(|m| m.sequence > start) {
        if !subject_matches(&consumer.filter_subject, &msg.subject) {
            consumer.cursor = msg.sequence;
            continue;
        }
        if !deliver(shared, stream_name, consumer_name, consumer, msg, 1) {
            break;
        }
        consumer.cursor = msg.sequence;
        consumer.pending.insert(msg.sequence, 1);
        timers.push(AckTimer {
            stream: stream_name.to_string(),
            consumer: consumer_name.to_string(),
            sequence: msg.sequence,
            num_delivered: 1,
            after: consumer.ack_wait,
        });
    }
    timers
}

fn deliver(
    shared: &Shared,
    stream_name: &str,
    consumer_name: &str,
    consumer: &mut ConsumerState,
    msg: &StoredMessage,
    num_delivered: u64,
) -> bool {
    let delivery = Delivery {
        payload: msg.payload.clone(),
        subject: msg.subject.clone(),
        stream: stream_name.to_string(),
        sequence: msg.sequence,
        num_delivered,
        ack_deadline: Instant::now() + consumer.ack_wait,
        queue_group: consumer.queue_group.clone(),
        durable_name: consumer_name.to_string(),
    };
    consumer.send(|| pending_delivery(shared, delivery.clone()))
}

fn pending_delivery(shared: &Shared, delivery: Delivery) -> PendingDelivery {
    let key = (
        delivery.stream.clone(),
        delivery.durable_name.clone(),
        delivery.sequence,
        delivery.num_delivered,
    );
    let (ack_state, nak_state, term_state) = (shared.clone(), shared.clone(), shared.clone());
    let (ack_key, nak_key, term_key) = (key.clone(), key.clone(), key);

    PendingDelivery::new(
        delivery,
        move || {
            Box::pin(async move {
                let (stream, consumer, sequence, _) = ack_key;
                settle(&ack_state, &stream, &consumer, sequence, true).await
            })
        },
        move || {
            Box::pin(async move {
                let (stream, consumer, sequence, num_delivered) = nak_key;
                let timers = {
                    let mut state = nak_state.lock().await;
                    if state.closed {
                        return Err(EventError::Closed);
                    }
                    expire(&nak_state, &mut state, &stream, &consumer, sequence, num_delivered)
                };
                for timer in timers {
                    arm(nak_state.clone(), timer);
                }
                Ok(())
            })
        },
        move || {
            Box::pin(async move {
                let (stream, consumer, sequence, _) = term_key;
                settle(&term_state, &stream, &consumer, sequence, false).await
            })
        },
    )
}

/// Retire a pending message after an ack or term
async fn settle(
    shared: &Shared,
    stream: &str,
    consumer: &str,
    sequence: u64,
    acked: bool,
) -> Result<()> {
    let mut state = shared.lock().await;
    if state.closed {
        return Err(EventError::Closed);
    }
    let Some(stream_state) = state.streams.get_mut(stream) else {
        return Err(EventError::Ack(format!("stream '{}' no longer exists", stream)));
    };
    let retired = stream_state
        .consumers
        .get_mut(consumer)
        .and_then(|c| c.pending.remove(&sequence))
        .is_some();

    if retired && acked && stream_state.descriptor.retention == RetentionPolicy::WorkQueue {
        stream_state.messages.retain(|m| m.sequence != sequence);
    }

    tracing::trace!(stream, consumer, sequence, acked, retired, "Delivery settled");
    Ok(())
}

/// Redeliver an unacked attempt, or give up once `max_deliver` is reached
fn expire(
    shared: &Shared,
    state: &mut State,
    stream_name: &str,
    consumer_name: &str,
    sequence: u64,
    num_delivered: u64,
) -> Vec<AckTimer> {
    let Some(stream) = state.streams.get_mut(stream_name) else {
        return Vec::new();
    };
    let StreamState {
        messages,
        consumers,
        ..
    } = stream;
    let Some(consumer) = consumers.get_mut(consumer_name) else {
        return Vec::new();
    };

    // Acked, terminated, or superseded by a later attempt
    if consumer.pending.get(&sequence) != Some(&num_delivered) {
        return Vec::new();
    }

    if consumer.max_deliver > 0 && num_delivered >= consumer.max_deliver as u64 {
        consumer.pending.remove(&sequence);
        tracing::debug!(
            stream = stream_name,
            consumer = consumer_name,
            sequence,
            num_delivered,
            "Max deliveries reached, message will not be redelivered"
        );
        return Vec::new();
    }

    let Some(msg) = messages.iter().find(|m| m.sequence == sequence) else {
        consumer.pending.remove(&sequence);
        return Vec::new();
    };

    let next = num_delivered + 1;
    let (attempt, after) = if deliver(shared, stream_name, consumer_name, consumer, msg, next) {
        consumer.pending.insert(sequence, next);
        (next, consumer.ack_wait)
    } else {
        // No live member: check again later without consuming an attempt
        (num_delivered, consumer.ack_wait)
    };

    vec![AckTimer {
        stream: stream_name.to_string(),
        consumer: consumer_name.to_string(),
        sequence,
        num_delivered: attempt,
        after,
    }]
}

fn arm(shared: Shared, timer: AckTimer) {
    tokio::spawn(async move {
        tokio::time::sleep(timer.after).await;
        let next = {
            let mut state = shared.lock().await;
            if state.closed {
                return;
            }
            expire(
                &shared,
                &mut state,
                &timer.stream,
                &timer.consumer,
                timer.sequence,
                timer.num_delivered,
            )
        };
        for timer in next {
            arm(shared.clone(), timer);
        }
    });
}

/// One member's view of a memory queue subscription
pub struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<PendingDelivery>,
    member_id: u64,
    state: Shared,
    stream: String,
    durable_name: String,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<PendingDelivery>> {
        Ok(self.rx.recv().await)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if let Some(consumer) = state
                .streams
                .get_mut(&self.stream)
                .and_then(|s| s.consumers.get_mut(&self.durable_name))
            {
                consumer.members.retain(|m| m.id != self.member_id);
            }
        }

        // Undelivered items go back to the broker via their ack timers
        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        tracing::debug!(
            stream = %self.stream,
            durable = %self.durable_name,
            member = self.member_id,
            "Memory subscription closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor::new("student", vec!["student.*".to_string()])
    }

    async fn broker_with_stream() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.create_stream(&descriptor()).await.unwrap();
        broker
    }

    async fn recv(sub: &mut Box<dyn Subscription>) -> PendingDelivery {
        timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("delivery timed out")
            .unwrap()
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_stream_lookup() {
        let broker = MemoryBroker::new();
        assert!(matches!(broker.stream_info("student").await, StreamLookup::NotFound));

        broker.create_stream(&descriptor()).await.unwrap();
        match broker.stream_info("student").await {
            StreamLookup::Found(info) => {
                assert_eq!(info.name, "student");
                assert_eq!(info.subjects, vec!["student.*"]);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_stream_identical_is_ok_conflicting_fails() {
        let broker = broker_with_stream().await;
        broker.create_stream(&descriptor()).await.unwrap();

        let conflicting = descriptor().with_max_age(Duration::from_secs(5));
        let err = broker.create_stream(&conflicting).await.unwrap_err();
        assert!(matches!(err, EventError::Provisioning { .. }));
        assert_eq!(broker.create_stream_calls().await, 3);
    }

    #[tokio::test]
    async fn test_create_stream_rejects_overlapping_subjects() {
        let broker = broker_with_stream().await;
        let other = StreamDescriptor::new("student-copy", vec!["student.Created".to_string()]);
        assert!(broker.create_stream(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_create_stream_rejects_invalid_name() {
        let broker = MemoryBroker::new();
        let bad = StreamDescriptor::new("student.v1", vec!["student.*".to_string()]);
        assert!(broker.create_stream(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_stream_fails() {
        let broker = MemoryBroker::new();
        let err = broker
            .publish("student.Created", Bytes::from_static(b"{}"), &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_publish_assigns_sequences() {
        let broker = broker_with_stream().await;
        let opts = PublishOptions::default();
        let a = broker.publish("student.Created", Bytes::from_static(b"1"), &opts).await.unwrap();
        let b = broker.publish("student.Created", Bytes::from_static(b"2"), &opts).await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(a.stream, "student");
        assert_eq!(broker.stream_len("student").await, Some(2));
    }

    #[tokio::test]
    async fn test_publish_dedup_by_msg_id() {
        let broker = broker_with_stream().await;
        let opts = PublishOptions {
            msg_id: Some("student-1".to_string()),
            ..Default::default()
        };
        let first = broker.publish("student.Created", Bytes::from_static(b"1"), &opts).await.unwrap();
        let second = broker.publish("student.Created", Bytes::from_static(b"1"), &opts).await.unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(broker.stream_len("student").await, Some(1));
    }

    #[tokio::test]
    async fn test_msg_id_forgotten_after_duplicate_window() {
        let broker = MemoryBroker::new();
        broker
            .create_stream(&descriptor().with_duplicate_window(Duration::from_secs(1)))
            .await
            .unwrap();
        let opts = PublishOptions {
            msg_id: Some("student-1".to_string()),
            ..Default::default()
        };

        broker.publish("student.Created", Bytes::from_static(b"1"), &opts).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let again = broker.publish("student.Created", Bytes::from_static(b"1"), &opts).await.unwrap();

        assert!(!again.duplicate);
        assert_eq!(again.sequence, 2);
        assert_eq!(broker.state.lock().await.streams["student"].dedup.len(), 1);
    }

    #[tokio::test]
    async fn test_max_messages_limit() {
        let broker = MemoryBroker::new();
        let mut desc = descriptor();
        desc.max_messages = 2;
        broker.create_stream(&desc).await.unwrap();
        for i in 0..5u8 {
            broker
                .publish("student.Created", Bytes::from(vec![i]), &PublishOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(broker.stream_len("student").await, Some(2));
    }

    #[tokio::test]
    async fn test_backlog_delivered_on_subscribe_and_ack_retires() {
        let broker = broker_with_stream().await;
        broker
            .publish("student.Created", Bytes::from_static(b"a"), &PublishOptions::default())
            .await
            .unwrap();

        let opts = SubscribeOptions::new("q", "d").with_ack_wait(Duration::from_secs(5));
        let mut sub = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        let pending = recv(&mut sub).await;
        assert_eq!(pending.delivery.sequence, 1);
        assert_eq!(pending.delivery.num_delivered, 1);
        assert_eq!(pending.delivery.durable_name, "d");
        assert_eq!(broker.pending_acks("student", "d").await, Some(1));

        pending.ack().await.unwrap();
        assert_eq!(broker.pending_acks("student", "d").await, Some(0));
    }

    #[tokio::test]
    async fn test_unacked_delivery_redelivered_until_max() {
        let broker = broker_with_stream().await;
        let opts = SubscribeOptions::new("q", "d")
            .with_ack_wait(Duration::from_millis(30))
            .with_max_deliver(3);
        let mut sub = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        broker
            .publish("student.Created", Bytes::from_static(b"a"), &PublishOptions::default())
            .await
            .unwrap();

        for attempt in 1..=3 {
            let pending = recv(&mut sub).await;
            assert_eq!(pending.delivery.num_delivered, attempt);
        }

        let extra = timeout(Duration::from_millis(200), sub.next()).await;
        assert!(extra.is_err(), "no delivery beyond max_deliver");
        assert_eq!(broker.pending_acks("student", "d").await, Some(0));
    }

    #[tokio::test]
    async fn test_nak_redelivers_immediately() {
        let broker = broker_with_stream().await;
        let opts = SubscribeOptions::new("q", "d").with_ack_wait(Duration::from_secs(30));
        let mut sub = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        broker
            .publish("student.Created", Bytes::from_static(b"a"), &PublishOptions::default())
            .await
            .unwrap();

        recv(&mut sub).await.nak().await.unwrap();
        let again = recv(&mut sub).await;
        assert_eq!(again.delivery.num_delivered, 2);
    }

    #[tokio::test]
    async fn test_term_stops_redelivery() {
        let broker = broker_with_stream().await;
        let opts = SubscribeOptions::new("q", "d").with_ack_wait(Duration::from_millis(20));
        let mut sub = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        broker
            .publish("student.Created", Bytes::from_static(b"a"), &PublishOptions::default())
            .await
            .unwrap();

        recv(&mut sub).await.term().await.unwrap();
        assert!(timeout(Duration::from_millis(150), sub.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_group_round_robin() {
        let broker = broker_with_stream().await;
        let opts = SubscribeOptions::new("q", "d").with_ack_wait(Duration::from_secs(5));
        let mut a = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        let mut b = broker.queue_subscribe("student.Created", &opts).await.unwrap();

        for i in 0..4u8 {
            broker
                .publish("student.Created", Bytes::from(vec![i]), &PublishOptions::default())
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(recv(&mut a).await.delivery.sequence);
            seen.push(recv(&mut b).await.delivery.sequence);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_durable_bound_to_other_queue_group() {
        let broker = broker_with_stream().await;
        broker
            .queue_subscribe("student.Created", &SubscribeOptions::new("q1", "d"))
            .await
            .unwrap();
        let err = broker
            .queue_subscribe("student.Created", &SubscribeOptions::new("q2", "d"))
            .await
            .err()
            .expect("queue group mismatch must fail");
        assert!(matches!(err, EventError::Subscribe { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribed_member_work_moves_to_peer() {
        let broker = broker_with_stream().await;
        let opts = SubscribeOptions::new("q", "d").with_ack_wait(Duration::from_millis(40));
        let mut a = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        broker
            .publish("student.Created", Bytes::from_static(b"a"), &PublishOptions::default())
            .await
            .unwrap();
        a.unsubscribe().await.unwrap();

        let mut b = broker.queue_subscribe("student.Created", &opts).await.unwrap();
        let pending = recv(&mut b).await;
        assert_eq!(pending.delivery.sequence, 1);
        assert_eq!(pending.delivery.num_delivered, 2);
    }

    #[tokio::test]
    async fn test_drain_closes_subscriptions_and_rejects_publish() {
        let broker = broker_with_stream().await;
        let mut sub = broker
            .queue_subscribe("student.Created", &SubscribeOptions::new("q", "d"))
            .await
            .unwrap();

        broker.drain().await.unwrap();
        assert!(sub.next().await.unwrap().is_none());

        let err = broker
            .publish("student.Created", Bytes::from_static(b"a"), &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Closed));
    }
}
