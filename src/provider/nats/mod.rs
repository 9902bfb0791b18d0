//! NATS JetStream broker
//!
//! Implements `Broker` on top of NATS JetStream: persistent streams,
//! durable push consumers bound to a queue group, explicit acks.

mod client;
mod config;
mod subscriber;

pub use client::NatsClient;
pub use config::NatsConfig;
pub use subscriber::NatsSubscription;

use crate::error::Result;
use crate::provider::{Broker, StreamLookup, Subscription};
use crate::types::{DeliveryReceipt, PublishOptions, StreamDescriptor, StreamInfo, SubscribeOptions};
use async_trait::async_trait;
use bytes::Bytes;

/// NATS JetStream broker
///
/// Wraps `NatsClient` and implements the `Broker` trait.
pub struct NatsBroker {
    client: NatsClient,
}

impl NatsBroker {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn stream_info(&self, name: &str) -> StreamLookup {
        self.client.stream_info(name).await
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamInfo> {
        self.client.create_stream(descriptor).await
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: &PublishOptions,
    ) -> Result<DeliveryReceipt> {
        self.client.publish(subject, payload, opts).await
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        let sub = self.client.queue_subscribe(subject, opts).await?;
        Ok(Box::new(sub))
    }

    async fn drain(&self) -> Result<()> {
        self.client.drain().await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
