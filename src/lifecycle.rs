//! Process lifecycle: wait for termination, then tear down in order
//!
//! The controller owns the consumers and the broker handle. Once a
//! termination signal arrives (or the token is cancelled) it unsubscribes
//! every consumer, waiting for in-flight handlers and acks, and only then
//! drains the broker connection.

use crate::consumer::DurableConsumer;
use crate::error::{EventError, Result};
use crate::provider::Broker;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// What ended the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// A process signal (e.g., "SIGINT", "SIGTERM")
    Signal(&'static str),
    /// The lifecycle token was cancelled programmatically
    Cancelled,
    /// The trigger future itself failed (e.g., a signal handler could not be installed)
    Failed,
}

/// Outcome of the teardown sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    /// Consumers unsubscribed cleanly
    pub unsubscribed: usize,
    /// Teardown steps that failed, in order
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Owns shutdown for one process
pub struct Lifecycle {
    broker: Arc<dyn Broker>,
    token: CancellationToken,
    consumers: Vec<DurableConsumer>,
}

impl Lifecycle {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            token: CancellationToken::new(),
            consumers: Vec::new(),
        }
    }

    /// Token cancelled when shutdown begins; hand it to long-lived tasks
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown without waiting for a signal
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Hand a consumer over so it is unsubscribed during teardown
    pub fn attach(&mut self, consumer: DurableConsumer) {
        self.consumers.push(consumer);
    }

    pub fn consumers(&self) -> &[DurableConsumer] {
        &self.consumers
    }

    /// Block until SIGINT/SIGTERM (or `shutdown()`), then tear down
    pub async fn run(self) -> Result<ShutdownReport> {
        self.run_until(termination_signal()).await
    }

    /// Block until `trigger` resolves (or `shutdown()`), then tear down
    ///
    /// Teardown runs even when `trigger` fails; that error is returned
    /// afterwards.
    pub async fn run_until<F>(mut self, trigger: F) -> Result<ShutdownReport>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let (trigger, trigger_error) = tokio::select! {
            signal = trigger => match signal {
                Ok(name) => (ShutdownTrigger::Signal(name), None),
                Err(e) => (ShutdownTrigger::Failed, Some(e)),
            },
            () = self.token.cancelled() => (ShutdownTrigger::Cancelled, None),
        };

        if let Some(ref e) = trigger_error {
            tracing::error!(error = %e, "Shutdown trigger failed, tearing down");
        }
        tracing::info!(trigger = ?trigger, "Shutting down");
        self.token.cancel();

        let mut unsubscribed = 0;
        let mut errors = Vec::new();

        for consumer in &mut self.consumers {
            match consumer.unsubscribe().await {
                Ok(()) => unsubscribed += 1,
                Err(e) => {
                    tracing::warn!(consumer = %consumer.name(), error = %e, "Failed to unsubscribe");
                    errors.push(format!("unsubscribe {}: {}", consumer.name(), e));
                }
            }
        }

        if let Err(e) = self.broker.drain().await {
            tracing::warn!(broker = self.broker.name(), error = %e, "Failed to drain broker");
            errors.push(format!("drain {}: {}", self.broker.name(), e));
        }

        let report = ShutdownReport {
            trigger,
            unsubscribed,
            errors,
        };
        tracing::info!(
            unsubscribed = report.unsubscribed,
            clean = report.is_clean(),
            "Shutdown complete"
        );

        // Teardown has run; the trigger failure still surfaces to the caller
        match trigger_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Wait for SIGINT or SIGTERM and return the signal's name
pub async fn termination_signal() -> Result<&'static str> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .map(|()| "SIGINT")
            .map_err(|e| EventError::Signal(format!("failed to install Ctrl+C handler: {}", e)))
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| EventError::Signal(format!("failed to install SIGTERM handler: {}", e)))?;
        sigterm.recv().await;
        Ok::<_, EventError>("SIGTERM")
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<&'static str>>();

    let name = tokio::select! {
        name = ctrl_c => name?,
        name = terminate => name?,
    };
    tracing::info!(signal = name, "Received termination signal");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MessageHandler;
    use crate::provider::memory::MemoryBroker;
    use crate::provider::StreamLookup;
    use crate::types::{Delivery, StreamDescriptor, Student, SubscribeOptions};

    #[tokio::test]
    async fn test_cancel_runs_teardown_and_drains() {
        let broker = Arc::new(MemoryBroker::new());
        let lifecycle = Lifecycle::new(broker.clone());
        lifecycle.shutdown();

        let report = lifecycle
            .run_until(std::future::pending::<Result<&'static str>>())
            .await
            .unwrap();
        assert_eq!(report.trigger, ShutdownTrigger::Cancelled);
        assert_eq!(report.unsubscribed, 0);
        assert!(report.is_clean());
        assert!(matches!(broker.stream_info("student").await, StreamLookup::Failed(EventError::Closed)));
    }

    #[tokio::test]
    async fn test_trigger_future_names_signal() {
        let broker = Arc::new(MemoryBroker::new());
        let lifecycle = Lifecycle::new(broker);
        let report = lifecycle.run_until(async { Ok("SIGTERM") }).await.unwrap();
        assert_eq!(report.trigger, ShutdownTrigger::Signal("SIGTERM"));
    }

    struct Ignore;

    #[async_trait::async_trait]
    impl MessageHandler<Student> for Ignore {
        async fn handle(&self, _record: Student, _delivery: &Delivery) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trigger_error_still_tears_down() {
        let broker = Arc::new(MemoryBroker::new());
        broker
            .create_stream(&StreamDescriptor::new("student", vec!["student.*".to_string()]))
            .await
            .unwrap();

        let mut lifecycle = Lifecycle::new(broker.clone());
        let token = lifecycle.token();
        let mut consumer = DurableConsumer::new("attached").with_cancellation(lifecycle.token());
        consumer
            .subscribe(
                broker.as_ref(),
                "student.Created",
                SubscribeOptions::new("queue-push", "durable-push"),
                Ignore,
            )
            .await
            .unwrap();
        lifecycle.attach(consumer);

        let err = lifecycle
            .run_until(async { Err(EventError::Signal("no handler".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Signal(_)));
        assert!(token.is_cancelled());
        assert!(matches!(broker.stream_info("student").await, StreamLookup::Failed(EventError::Closed)));
    }

    #[tokio::test]
    async fn test_token_is_shared() {
        let broker = Arc::new(MemoryBroker::new());
        let lifecycle = Lifecycle::new(broker);
        let token = lifecycle.token();
        assert!(!token.is_cancelled());
        lifecycle.shutdown();
        assert!(token.is_cancelled());
    }
}
