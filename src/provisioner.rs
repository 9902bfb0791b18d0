//! Idempotent stream provisioning
//!
//! A publisher calls `ensure_stream` before its first publish. Existing
//! streams are left untouched; a lookup that fails for any reason other
//! than "not found" is logged and creation is attempted anyway.

use crate::error::{EventError, Result};
use crate::provider::{Broker, StreamLookup};
use crate::types::{StreamDescriptor, StreamInfo};

/// What `ensure_stream` found or did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// The stream already existed; nothing was created
    Existing(StreamInfo),
    /// The stream was created by this call
    Created(StreamInfo),
}

impl Provisioned {
    pub fn info(&self) -> &StreamInfo {
        match self {
            Self::Existing(info) | Self::Created(info) => info,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Ensure a stream exists, creating it at most once
pub async fn ensure_stream(
    broker: &dyn Broker,
    descriptor: &StreamDescriptor,
) -> Result<Provisioned> {
    match broker.stream_info(&descriptor.name).await {
        StreamLookup::Found(info) => {
            tracing::debug!(stream = %descriptor.name, messages = info.messages, "Stream already exists");
            return Ok(Provisioned::Existing(info));
        }
        StreamLookup::NotFound => {}
        StreamLookup::Failed(e) => {
            tracing::warn!(
                stream = %descriptor.name,
                error = %e,
                "Stream lookup failed, attempting creation anyway"
            );
        }
    }

    tracing::info!(
        stream = %descriptor.name,
        subjects = ?descriptor.subjects,
        "Creating stream"
    );

    let info = broker
        .create_stream(descriptor)
        .await
        .map_err(|e| match e {
            EventError::Provisioning { .. } => e,
            other => EventError::Provisioning {
                stream: descriptor.name.clone(),
                reason: other.to_string(),
            },
        })?;
    Ok(Provisioned::Created(info))
}
