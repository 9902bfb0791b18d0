//! Sequential, fail-fast publisher

use crate::codec;
use crate::error::Result;
use crate::provider::Broker;
use crate::types::{DeliveryReceipt, PublishOptions};
use serde::Serialize;
use std::sync::Arc;

/// Publishes encoded records and waits for each broker ack
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    options: PublishOptions,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            options: PublishOptions::default(),
        }
    }

    /// Apply publish options (ack timeout) to every publish
    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    /// Encode and publish one record, blocking until the broker persists it
    pub async fn publish<T: Serialize>(&self, subject: &str, record: &T) -> Result<DeliveryReceipt> {
        self.publish_with_options(subject, record, &self.options).await
    }

    /// Publish one record with per-call options (e.g. a dedup `msg_id`)
    pub async fn publish_with_options<T: Serialize>(
        &self,
        subject: &str,
        record: &T,
        opts: &PublishOptions,
    ) -> Result<DeliveryReceipt> {
        let payload = codec::encode(record)?;
        let receipt = self.broker.publish(subject, payload, opts).await?;

        tracing::info!(
            subject,
            stream = %receipt.stream,
            sequence = receipt.sequence,
            "Event published"
        );

        Ok(receipt)
    }

    /// Publish records in order, stopping at the first failure
    ///
    /// Records after the failing one are never attempted; the failing
    /// record's error is returned.
    pub async fn publish_all<'a, T, I>(&self, subject: &str, records: I) -> Result<Vec<DeliveryReceipt>>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut receipts = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            match self.publish(subject, record).await {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    tracing::error!(
                        subject,
                        index,
                        published = receipts.len(),
                        error = %e,
                        "Publish failed, aborting remaining records"
                    );
                    return Err(e);
                }
            }
        }
        Ok(receipts)
    }

    pub fn broker(&self) -> &dyn Broker {
        self.broker.as_ref()
    }
}
