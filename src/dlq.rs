//! Dead Letter Queue: keep deliveries the consumer gave up on
//!
//! The broker only stops redelivering once `max_deliver` is reached; what
//! happens to the message afterwards is an application concern. The
//! consumer hands undecodable payloads and last-attempt handler failures to
//! a `DlqHandler`.

use crate::error::Result;
use crate::types::Delivery;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A delivery with context about why it was dead-lettered
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The delivery as last received
    pub delivery: Delivery,

    /// Reason the delivery was dead-lettered
    pub reason: String,

    /// Unix timestamp in milliseconds when the delivery was dead-lettered
    pub dead_lettered_at: u64,
}

impl DeadLetter {
    pub fn new(delivery: Delivery, reason: impl Into<String>) -> Self {
        Self {
            delivery,
            reason: reason.into(),
            dead_lettered_at: now_millis(),
        }
    }
}

/// Trait for dead letter queue handlers
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Handle a dead-lettered delivery
    async fn handle(&self, dead_letter: DeadLetter) -> Result<()>;

    /// Number of dead letters currently held
    async fn count(&self) -> Result<usize>;

    /// Most recent dead letters first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// Bounded in-memory DLQ handler
pub struct MemoryDlqHandler {
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    max_entries: usize,
}

impl MemoryDlqHandler {
    pub fn new(max_entries: usize) -> Self {
        Self {
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, dead_letter: DeadLetter) -> Result<()> {
        tracing::warn!(
            subject = %dead_letter.delivery.subject,
            sequence = dead_letter.delivery.sequence,
            num_delivered = dead_letter.delivery.num_delivered,
            reason = %dead_letter.reason,
            "Delivery dead-lettered"
        );

        let mut dead_letters = self.dead_letters.write().await;
        dead_letters.push(dead_letter);

        if self.max_entries > 0 && dead_letters.len() > self.max_entries {
            let excess = dead_letters.len() - self.max_entries;
            dead_letters.drain(..excess);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.dead_letters.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let dead_letters = self.dead_letters.read().await;
        Ok(dead_letters.iter().rev().take(limit).cloned().collect())
    }
}

/// Whether a failed delivery was the last attempt the broker will make
pub fn should_dead_letter(delivery: &Delivery, max_deliver: i64) -> bool {
    max_deliver > 0 && delivery.num_delivered >= max_deliver as u64
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
