//! Core types for the student-stream delivery layer
//!
//! Wire-facing types use explicit field names so payloads stay compatible
//! with the publisher/consumer programs that share the `student` stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Lifecycle status carried by a student event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A student domain event
///
/// Immutable once published. There is no dedup key; redelivery and
/// re-publishing can both surface the same student twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "entityID", alias = "studentID", alias = "StudentID")]
    pub student_id: i64,

    #[serde(rename = "parentID", alias = "ParentID")]
    pub parent_id: String,

    #[serde(alias = "Status")]
    pub status: StudentStatus,
}

impl Student {
    /// A freshly created student whose parent id follows `Parent-<id>`
    pub fn created(student_id: i64) -> Self {
        Self {
            student_id,
            parent_id: format!("Parent-{}", student_id),
            status: StudentStatus::Created,
        }
    }
}

/// Retention rule for a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep messages until a limit (age, count, bytes) is hit
    #[default]
    Limits,
    /// Keep messages while any consumer has interest
    Interest,
    /// Remove messages once acknowledged
    #[serde(alias = "work_queue")]
    WorkQueue,
}

/// Storage backend for a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// Description of a persistent, subject-scoped stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name (e.g., "student")
    pub name: String,

    /// Subject patterns captured by the stream (e.g., ["student.*"])
    pub subjects: Vec<String>,

    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Maximum message age in seconds (0 = unlimited)
    #[serde(default)]
    pub max_age_secs: u64,

    #[serde(default)]
    pub storage: StorageType,

    /// Maximum number of messages kept (-1 = unlimited)
    #[serde(default = "unlimited")]
    pub max_messages: i64,

    /// How long a publish `msg_id` is remembered for deduplication
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: u64,
}

fn unlimited() -> i64 {
    -1
}

fn default_duplicate_window() -> u64 {
    120
}

impl StreamDescriptor {
    /// Create a limits-retention stream descriptor
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            retention: RetentionPolicy::Limits,
            max_age_secs: 0,
            storage: StorageType::File,
            max_messages: unlimited(),
            duplicate_window_secs: default_duplicate_window(),
        }
    }

    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window_secs = window.as_secs();
        self
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_secs = max_age.as_secs();
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    /// Maximum message age as a duration (`Duration::ZERO` = unlimited)
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Summary of a stream as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub subjects: Vec<String>,
    pub messages: u64,
    pub consumer_count: usize,
}

/// Broker confirmation of a persisted publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Stream that stored the message
    pub stream: String,

    /// Stream-assigned sequence number
    pub sequence: u64,

    /// True if the broker dropped the publish as a duplicate
    pub duplicate: bool,
}

/// A message handed to a consumer, with its delivery bookkeeping
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Raw payload as stored in the stream
    pub payload: Bytes,

    /// Subject the message was published to
    pub subject: String,

    /// Stream that stores the message
    pub stream: String,

    /// Stream sequence number
    pub sequence: u64,

    /// Delivery attempt, starting at 1
    pub num_delivered: u64,

    /// Instant after which the broker treats the delivery as abandoned
    pub ack_deadline: Instant,

    pub queue_group: String,

    pub durable_name: String,
}

impl Delivery {
    /// Whether this is a redelivery of an earlier attempt
    pub fn is_redelivery(&self) -> bool {
        self.num_delivered > 1
    }

    /// Whether the ack deadline has already elapsed
    pub fn is_past_deadline(&self) -> bool {
        Instant::now() >= self.ack_deadline
    }
}

/// Options for publishing events
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Broker-side deduplication id (NATS: `Nats-Msg-Id` header)
    ///
    /// Not set by default; publishing the same record twice yields two
    /// messages unless the caller supplies a stable id.
    pub msg_id: Option<String>,

    /// How long to wait for the broker's publish ack
    pub timeout: Option<Duration>,
}

/// Options for a durable queue-group subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Queue group whose members compete for deliveries
    pub queue_group: String,

    /// Durable cursor name shared by the queue group
    pub durable_name: String,

    /// Total delivery attempts per message (<= 0 = unlimited)
    pub max_deliver: i64,

    /// Time the broker waits for an ack before redelivering
    pub ack_wait: Duration,
}

impl SubscribeOptions {
    pub fn new(queue_group: impl Into<String>, durable_name: impl Into<String>) -> Self {
        Self {
            queue_group: queue_group.into(),
            durable_name: durable_name.into(),
            max_deliver: -1,
            ack_wait: Duration::from_secs(30),
        }
    }

    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }
}
