use crate::config::AppConfig;
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::provider::Broker;
use crate::provisioner::ensure_stream;
use crate::publisher::Publisher;
use crate::types::Student;
use std::sync::Arc;

/// Execute the `publish` command: provision, publish `count` students, wait.
pub async fn execute(broker: Arc<dyn Broker>, config: &AppConfig, count: i64) -> Result<()> {
    let provisioned = ensure_stream(broker.as_ref(), &config.stream).await?;
    tracing::info!(
        stream = %provisioned.info().name,
        created = provisioned.was_created(),
        "Stream ready"
    );

    let students: Vec<Student> = (1..=count).map(Student::created).collect();
    let publisher = Publisher::new(broker.clone());
    let receipts = publisher.publish_all(&config.subject, &students).await?;

    for (student, receipt) in students.iter().zip(&receipts) {
        tracing::info!(
            student_id = student.student_id,
            stream = %receipt.stream,
            sequence = receipt.sequence,
            "Published student"
        );
    }

    println!(
        "Published {} students to '{}'. Press Ctrl+C to stop",
        receipts.len(),
        config.subject
    );

    let report = Lifecycle::new(broker).run().await?;
    if !report.is_clean() {
        tracing::warn!(errors = ?report.errors, "Shutdown finished with errors");
    }
    Ok(())
}
