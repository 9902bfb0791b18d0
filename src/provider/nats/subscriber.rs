//! NATS push-consumer subscription

use crate::error::{EventError, Result};
use crate::provider::{PendingDelivery, Subscription};
use crate::types::{Delivery, SubscribeOptions};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Instant;

type MessageStream = BoxStream<'static, std::result::Result<jetstream::Message, String>>;

/// One queue-group member attached to a durable push consumer
pub struct NatsSubscription {
    messages: Option<MessageStream>,
    opts: SubscribeOptions,
}

impl NatsSubscription {
    pub(crate) fn new(messages: MessageStream, opts: SubscribeOptions) -> Self {
        Self {
            messages: Some(messages),
            opts,
        }
    }

    fn to_pending(&self, msg: jetstream::Message) -> Result<PendingDelivery> {
        let info = msg
            .info()
            .map_err(|e| EventError::Consumer(format!("Invalid JetStream reply subject: {}", e)))?;

        let delivery = Delivery {
            payload: msg.payload.clone(),
            subject: msg.subject.to_string(),
            stream: info.stream.to_string(),
            sequence: info.stream_sequence,
            num_delivered: info.delivered.max(1) as u64,
            ack_deadline: Instant::now() + self.opts.ack_wait,
            queue_group: self.opts.queue_group.clone(),
            durable_name: self.opts.durable_name.clone(),
        };

        let (ack_msg, nak_msg, term_msg) = (msg.clone(), msg.clone(), msg);
        Ok(PendingDelivery::new(
            delivery,
            move || {
                Box::pin(async move {
                    ack_msg.ack().await.map_err(|e| EventError::Ack(e.to_string()))
                })
            },
            move || {
                Box::pin(async move {
                    nak_msg
                        .ack_with(AckKind::Nak(None))
                        .await
                        .map_err(|e| EventError::Ack(e.to_string()))
                })
            },
            move || {
                Box::pin(async move {
                    term_msg
                        .ack_with(AckKind::Term)
                        .await
                        .map_err(|e| EventError::Ack(e.to_string()))
                })
            },
        ))
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<PendingDelivery>> {
        let Some(messages) = self.messages.as_mut() else {
            return Ok(None);
        };

        let next = messages.next().await;
        match next {
            Some(Ok(msg)) => self.to_pending(msg).map(Some),
            Some(Err(e)) => Err(EventError::Consumer(format!(
                "Error receiving from durable '{}': {}",
                self.opts.durable_name, e
            ))),
            None => Ok(None),
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        // Dropping the message stream removes the queue subscription;
        // the durable consumer stays on the server.
        if self.messages.take().is_some() {
            tracing::info!(
                queue = %self.opts.queue_group,
                durable = %self.opts.durable_name,
                "Queue subscription released"
            );
        }
        Ok(())
    }
}
