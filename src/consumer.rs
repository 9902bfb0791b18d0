//! Durable queue-group consumer with manual acknowledgement
//!
//! A `DurableConsumer` owns one subscription handle. Deliveries are decoded
//! and handed to a `MessageHandler` one at a time; a successful handler is
//! followed by an explicit ack, a failing one leaves the delivery unacked so
//! the broker redelivers it after `ack_wait`, up to `max_deliver` attempts.
//!
//! Per-message failures never stop the consumer: undecodable payloads are
//! dead-lettered and terminated, ack failures are logged.

use crate::codec;
use crate::dlq::{should_dead_letter, DeadLetter, DlqHandler};
use crate::error::{EventError, Result};
use crate::provider::{Broker, PendingDelivery, Subscription};
use crate::types::{Delivery, SubscribeOptions};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause after a receive error before polling the subscription again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Processes decoded records
///
/// Return `Ok` only once the record is fully processed; the delivery is
/// acked right after.
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, record: T, delivery: &Delivery) -> Result<()>;
}

/// Counters for one consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub failed: u64,
    pub decode_errors: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    acked: AtomicU64,
    failed: AtomicU64,
    decode_errors: AtomicU64,
    dead_lettered: AtomicU64,
}

enum State {
    Unsubscribed,
    Active {
        subject: String,
        token: CancellationToken,
        task: JoinHandle<Box<dyn Subscription>>,
    },
}

/// Durable, queue-grouped consumer
pub struct DurableConsumer {
    name: String,
    state: State,
    counters: Arc<Counters>,
    dlq: Option<Arc<dyn DlqHandler>>,
    parent: Option<CancellationToken>,
}

impl DurableConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: State::Unsubscribed,
            counters: Arc::new(Counters::default()),
            dlq: None,
            parent: None,
        }
    }

    /// Route given-up deliveries to a dead letter handler
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Stop dispatching when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.parent = Some(token);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            acked: self.counters.acked.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Join `opts.queue_group` on the durable cursor and start dispatching
    pub async fn subscribe<T, H>(
        &mut self,
        broker: &dyn Broker,
        subject: &str,
        opts: SubscribeOptions,
        handler: H,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        if let State::Active {
            subject: ref active,
            ..
        } = self.state
        {
            return Err(EventError::Consumer(format!(
                "Consumer '{}' is already subscribed to '{}'",
                self.name, active
            )));
        }

        let subscription = broker.queue_subscribe(subject, &opts).await?;

        let token = self
            .parent
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        let dispatcher = Dispatcher {
            handler,
            opts: opts.clone(),
            counters: self.counters.clone(),
            dlq: self.dlq.clone(),
            _record: std::marker::PhantomData,
        };
        let task = tokio::spawn(dispatcher.run(subscription, token.clone()));

        tracing::info!(
            consumer = %self.name,
            subject,
            queue = %opts.queue_group,
            durable = %opts.durable_name,
            "Consumer subscribed"
        );

        self.state = State::Active {
            subject: subject.to_string(),
            token,
            task,
        };
        Ok(())
    }

    /// Stop dispatching and release the subscription handle
    ///
    /// Waits for an in-flight handler and its ack to finish. No handler is
    /// invoked after this returns.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        let State::Active {
            subject,
            token,
            task,
        } = std::mem::replace(&mut self.state, State::Unsubscribed)
        else {
            tracing::debug!(consumer = %self.name, "Consumer already unsubscribed");
            return Ok(());
        };

        token.cancel();
        let mut subscription = task.await.map_err(|e| {
            EventError::Consumer(format!("Dispatch task for '{}' failed: {}", self.name, e))
        })?;
        subscription.unsubscribe().await?;

        tracing::info!(
            consumer = %self.name,
            subject = %subject,
            stats = ?self.stats(),
            "Consumer unsubscribed"
        );
        Ok(())
    }
}

impl Drop for DurableConsumer {
    fn drop(&mut self) {
        if let State::Active { ref token, .. } = self.state {
            token.cancel();
        }
    }
}

struct Dispatcher<T, H> {
    handler: H,
    opts: SubscribeOptions,
    counters: Arc<Counters>,
    dlq: Option<Arc<dyn DlqHandler>>,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T, H> Dispatcher<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    async fn run(
        self,
        mut subscription: Box<dyn Subscription>,
        token: CancellationToken,
    ) -> Box<dyn Subscription> {
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = subscription.next() => next,
            };

            match next {
                Ok(Some(pending)) => self.process(pending).await,
                Ok(None) => {
                    tracing::info!(durable = %self.opts.durable_name, "Subscription closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        durable = %self.opts.durable_name,
                        error = %e,
                        "Error receiving delivery"
                    );
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
        subscription
    }

    async fn process(&self, pending: PendingDelivery) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let delivery = pending.delivery.clone();

        if delivery.is_redelivery() {
            tracing::debug!(
                subject = %delivery.subject,
                sequence = delivery.sequence,
                num_delivered = delivery.num_delivered,
                "Processing redelivered message"
            );
        }

        let record: T = match codec::decode(&delivery.payload) {
            Ok(record) => record,
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subject = %delivery.subject,
                    sequence = delivery.sequence,
                    error = %e,
                    "Undecodable payload, terminating delivery"
                );
                self.dead_letter(delivery, e.to_string()).await;
                if let Err(e) = pending.term().await {
                    tracing::warn!(error = %e, "Failed to terminate undecodable delivery");
                }
                return;
            }
        };

        match self.handler.handle(record, &delivery).await {
            Ok(()) => {
                if delivery.is_past_deadline() {
                    tracing::warn!(
                        sequence = delivery.sequence,
                        ack_wait = ?self.opts.ack_wait,
                        "Handler finished after the ack deadline; a redelivery may follow"
                    );
                }
                match pending.ack().await {
                    Ok(()) => {
                        self.counters.acked.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            subject = %delivery.subject,
                            sequence = delivery.sequence,
                            "Delivery acknowledged"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            sequence = delivery.sequence,
                            error = %e,
                            "Ack failed, the broker will redeliver"
                        );
                    }
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if should_dead_letter(&delivery, self.opts.max_deliver) {
                    tracing::error!(
                        sequence = delivery.sequence,
                        num_delivered = delivery.num_delivered,
                        error = %e,
                        "Handler failed on the last delivery attempt"
                    );
                    self.dead_letter(delivery, e.to_string()).await;
                    if let Err(e) = pending.term().await {
                        tracing::warn!(error = %e, "Failed to terminate exhausted delivery");
                    }
                } else {
                    tracing::warn!(
                        sequence = delivery.sequence,
                        num_delivered = delivery.num_delivered,
                        error = %e,
                        "Handler failed, leaving delivery unacked for redelivery"
                    );
                }
            }
        }
    }

    async fn dead_letter(&self, delivery: Delivery, reason: String) {
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        let Some(ref dlq) = self.dlq else {
            return;
        };
        if let Err(e) = dlq.handle(DeadLetter::new(delivery, reason)).await {
            tracing::warn!(error = %e, "Failed to record dead letter");
        }
    }
}
