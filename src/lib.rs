//! # student-stream
//!
//! At-least-once durable delivery over NATS JetStream.
//!
//! ## Overview
//!
//! `student-stream` is the contract layer between application code and a
//! streaming broker: streams are provisioned idempotently, events are
//! published one at a time with fail-fast batches, and durable queue-group
//! consumers acknowledge manually with bounded, ack-timeout driven
//! redelivery. A lifecycle controller drains everything on SIGINT/SIGTERM.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use student_stream::{ensure_stream, MemoryBroker, Publisher, StreamDescriptor, Student};
//!
//! # async fn example() -> student_stream::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let stream = StreamDescriptor::new("student", vec!["student.*".to_string()]);
//! ensure_stream(broker.as_ref(), &stream).await?;
//!
//! let publisher = Publisher::new(broker.clone());
//! let students: Vec<Student> = (1..=3).map(Student::created).collect();
//! publisher.publish_all("student.Created", &students).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Brokers
//!
//! - **nats**: NATS JetStream, durable push consumers with queue groups
//! - **memory**: in-process broker with the same delivery contract
//!
//! ## Architecture
//!
//! - **Broker** trait: stream lookup/creation, publish, queue subscribe, drain
//! - **ensure_stream**: idempotent provisioning
//! - **Publisher**: sequential, fail-fast publishing
//! - **DurableConsumer**: decode, handle, ack; dead-letters what it gives up on
//! - **Lifecycle**: signal-driven teardown: unsubscribe, then drain

pub mod cli;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod provisioner;
pub mod publisher;
pub mod types;

pub use config::{AppConfig, ConsumerConfig};
pub use consumer::{ConsumerStats, DurableConsumer, MessageHandler};
pub use dlq::{DeadLetter, DlqHandler, MemoryDlqHandler};
pub use error::{EventError, Result};
pub use lifecycle::{Lifecycle, ShutdownReport, ShutdownTrigger};
pub use provider::{Broker, PendingDelivery, StreamLookup, Subscription};
pub use provisioner::{ensure_stream, Provisioned};
pub use publisher::Publisher;
pub use types::{
    Delivery, DeliveryReceipt, PublishOptions, RetentionPolicy, StorageType, StreamDescriptor,
    StreamInfo, Student, StudentStatus, SubscribeOptions,
};

pub use provider::memory::MemoryBroker;
pub use provider::nats::{NatsBroker, NatsConfig};
