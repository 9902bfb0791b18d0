//! Broker trait: the seam between the delivery layer and the message bus
//!
//! The provisioner, publisher, and consumer only talk to a `Broker`.
//! `nats` talks to a JetStream server; `memory` reproduces the same
//! delivery contract in-process for tests and single-process use.

use crate::error::{EventError, Result};
use crate::types::{
    Delivery, DeliveryReceipt, PublishOptions, StreamDescriptor, StreamInfo, SubscribeOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

pub mod memory;
pub mod nats;

/// Outcome of looking a stream up by name
#[derive(Debug)]
pub enum StreamLookup {
    /// The stream exists
    Found(StreamInfo),
    /// The broker reported that no such stream exists
    NotFound,
    /// The lookup itself failed (timeout, permissions, ...)
    Failed(EventError),
}

/// Core trait for broker backends
#[async_trait]
pub trait Broker: Send + Sync {
    /// Look up a stream by name
    async fn stream_info(&self, name: &str) -> StreamLookup;

    /// Create a stream from a descriptor
    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamInfo>;

    /// Publish a payload and wait for the broker to persist it
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: &PublishOptions,
    ) -> Result<DeliveryReceipt>;

    /// Join a queue group on a durable, manually acknowledged cursor
    async fn queue_subscribe(
        &self,
        subject: &str,
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>>;

    /// Flush pending work and close the connection
    async fn drain(&self) -> Result<()>;

    /// Broker name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// Handle on one member's attachment to a durable queue-group cursor
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next delivery; `None` once the subscription is closed
    async fn next(&mut self) -> Result<Option<PendingDelivery>>;

    /// Detach from the queue group. The durable cursor stays on the broker.
    async fn unsubscribe(&mut self) -> Result<()>;
}

type AckFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A delivery awaiting acknowledgement
pub struct PendingDelivery {
    /// The delivered message
    pub delivery: Delivery,

    ack_fn: AckFn,
    nak_fn: AckFn,
    term_fn: AckFn,
}

impl PendingDelivery {
    /// Create a pending delivery with ack/nak/term callbacks
    pub fn new(
        delivery: Delivery,
        ack_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
        nak_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
        term_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            delivery,
            ack_fn: Box::new(ack_fn),
            nak_fn: Box::new(nak_fn),
            term_fn: Box::new(term_fn),
        }
    }

    /// Acknowledge successful processing
    pub async fn ack(self) -> Result<()> {
        (self.ack_fn)().await
    }

    /// Negative-acknowledge (request immediate redelivery)
    pub async fn nak(self) -> Result<()> {
        (self.nak_fn)().await
    }

    /// Terminate: the message is never redelivered
    pub async fn term(self) -> Result<()> {
        (self.term_fn)().await
    }
}

impl std::fmt::Debug for PendingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDelivery")
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// Match a subject against a NATS pattern (`*` = one token, `>` = the rest)
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
