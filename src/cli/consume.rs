use crate::config::AppConfig;
use crate::consumer::{DurableConsumer, MessageHandler};
use crate::dlq::MemoryDlqHandler;
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::provider::Broker;
use crate::provisioner::ensure_stream;
use crate::types::{Delivery, Student};
use async_trait::async_trait;
use std::sync::Arc;

/// Logs each student; processing always succeeds.
struct LogStudent;

#[async_trait]
impl MessageHandler<Student> for LogStudent {
    async fn handle(&self, student: Student, delivery: &Delivery) -> Result<()> {
        tracing::info!(
            sequence = delivery.sequence,
            attempt = delivery.num_delivered,
            parent_id = %student.parent_id,
            status = %student.status,
            "Student with StudentID:{} has been processed",
            student.student_id
        );
        Ok(())
    }
}

/// Execute the `consume` command: subscribe and process until a signal.
pub async fn execute(broker: Arc<dyn Broker>, config: &AppConfig) -> Result<()> {
    ensure_stream(broker.as_ref(), &config.stream).await?;

    let mut lifecycle = Lifecycle::new(broker.clone());
    let mut consumer = DurableConsumer::new(config.consumer.durable_name.clone())
        .with_dlq(Arc::new(MemoryDlqHandler::default()))
        .with_cancellation(lifecycle.token());

    consumer
        .subscribe(
            broker.as_ref(),
            &config.subject,
            config.consumer.subscribe_options(),
            LogStudent,
        )
        .await?;
    lifecycle.attach(consumer);

    println!(
        "Consuming '{}' as '{}' in group '{}'. Press Ctrl+C to stop",
        config.subject, config.consumer.durable_name, config.consumer.queue_group
    );

    let report = lifecycle.run().await?;
    if !report.is_clean() {
        tracing::warn!(errors = ?report.errors, "Shutdown finished with errors");
    }
    Ok(())
}
