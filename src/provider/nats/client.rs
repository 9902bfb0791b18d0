//! NATS JetStream client: connect, provision, publish, queue-subscribe

use super::config::NatsConfig;
use super::subscriber::NatsSubscription;
use crate::error::{EventError, Result};
use crate::provider::StreamLookup;
use crate::types::{
    DeliveryReceipt, PublishOptions, RetentionPolicy, StorageType, StreamDescriptor, StreamInfo,
    SubscribeOptions,
};
use async_nats::jetstream;
use async_nats::jetstream::context::GetStreamErrorKind;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// NATS JetStream client
///
/// Owns the connection shared by the publish and subscribe paths.
/// `async_nats::Client` is cheap to clone and safe to use concurrently.
pub struct NatsClient {
    client: async_nats::Client,

    jetstream: jetstream::Context,

    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and open a JetStream context
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| EventError::Connection(format!("{}: {}", config, e)))?;

        tracing::info!(url = %config.url, user = ?config.user, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            config: Arc::new(config),
        })
    }

    /// Look up a stream, separating "not found" from other failures
    pub async fn stream_info(&self, name: &str) -> StreamLookup {
        match self.jetstream.get_stream(name).await {
            Ok(stream) => StreamLookup::Found(to_stream_info(stream.cached_info())),
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(err)
                    if err.error_code() == jetstream::ErrorCode::STREAM_NOT_FOUND =>
                {
                    StreamLookup::NotFound
                }
                _ => StreamLookup::Failed(EventError::Stream(format!(
                    "Failed to look up stream '{}': {}",
                    name, e
                ))),
            },
        }
    }

    /// Create a stream from a descriptor
    pub async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamInfo> {
        let stream = self
            .jetstream
            .create_stream(build_stream_config(descriptor))
            .await
            .map_err(|e| EventError::Provisioning {
                stream: descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            stream = %descriptor.name,
            subjects = ?descriptor.subjects,
            retention = ?descriptor.retention,
            max_age_secs = descriptor.max_age_secs,
            "JetStream stream created"
        );

        Ok(to_stream_info(stream.cached_info()))
    }

    /// Publish a payload and wait for the JetStream ack
    pub async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: &PublishOptions,
    ) -> Result<DeliveryReceipt> {
        let publish_err = |reason: String| EventError::Publish {
            subject: subject.to_string(),
            reason,
        };

        let ack_fut = match opts.msg_id {
            Some(ref msg_id) => {
                let mut headers = async_nats::HeaderMap::new();
                headers.insert("Nats-Msg-Id", msg_id.as_str());
                self.jetstream
                    .publish_with_headers(subject.to_string(), headers, payload)
                    .await
            }
            None => self.jetstream.publish(subject.to_string(), payload).await,
        }
        .map_err(|e| publish_err(e.to_string()))?;

        let ack = match opts.timeout {
            Some(timeout) => tokio::time::timeout(timeout, ack_fut).await.map_err(|_| {
                EventError::Timeout(format!(
                    "Publish ack timed out after {:?} for subject '{}'",
                    timeout, subject
                ))
            })?,
            None => ack_fut.await,
        }
        .map_err(|e| publish_err(format!("ack failed: {}", e)))?;

        tracing::debug!(
            subject,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Message published"
        );

        Ok(DeliveryReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    /// Join a queue group on a durable push consumer with explicit acks
    pub async fn queue_subscribe(
        &self,
        subject: &str,
        opts: &SubscribeOptions,
    ) -> Result<NatsSubscription> {
        let subscribe_err = |reason: String| EventError::Subscribe {
            subject: subject.to_string(),
            reason,
        };

        let stream_name = self
            .jetstream
            .stream_by_subject(subject)
            .await
            .map_err(|e| subscribe_err(format!("no stream captures subject: {}", e)))?;

        let stream = self
            .jetstream
            .get_stream(&stream_name)
            .await
            .map_err(|e| EventError::Stream(format!(
                "Failed to get stream '{}': {}",
                stream_name, e
            )))?;

        let config = build_consumer_config(subject, opts, self.client.new_inbox());
        let consumer = stream
            .get_or_create_consumer(&opts.durable_name, config)
            .await
            .map_err(|e| EventError::Consumer(format!(
                "Failed to create durable consumer '{}': {}",
                opts.durable_name, e
            )))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| subscribe_err(e.to_string()))?;

        tracing::info!(
            stream = %stream_name,
            subject,
            queue = %opts.queue_group,
            durable = %opts.durable_name,
            max_deliver = opts.max_deliver,
            ack_wait = ?opts.ack_wait,
            "Durable queue subscription created"
        );

        Ok(NatsSubscription::new(
            messages.map(|m| m.map_err(|e| e.to_string())).boxed(),
            opts.clone(),
        ))
    }

    /// Drain subscriptions, flush buffered publishes and acks, then close
    pub async fn drain(&self) -> Result<()> {
        self.client
            .drain()
            .await
            .map_err(|e| EventError::Connection(format!("Failed to drain connection: {}", e)))?;
        tracing::info!(url = %self.config.url, "NATS connection drained");
        Ok(())
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the JetStream context
    pub fn jetstream_context(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

fn to_stream_info(info: &jetstream::stream::Info) -> StreamInfo {
    StreamInfo {
        name: info.config.name.clone(),
        subjects: info.config.subjects.clone(),
        messages: info.state.messages,
        consumer_count: info.state.consumer_count,
    }
}

/// Build a JetStream stream config from a descriptor
fn build_stream_config(descriptor: &StreamDescriptor) -> jetstream::stream::Config {
    let retention = match descriptor.retention {
        RetentionPolicy::Limits => jetstream::stream::RetentionPolicy::Limits,
        RetentionPolicy::Interest => jetstream::stream::RetentionPolicy::Interest,
        RetentionPolicy::WorkQueue => jetstream::stream::RetentionPolicy::WorkQueue,
    };

    let storage = match descriptor.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    // The server rejects a duplicate window longer than max_age
    let max_age = descriptor.max_age();
    let duplicate_window = if max_age.is_zero() {
        descriptor.duplicate_window()
    } else {
        descriptor.duplicate_window().min(max_age)
    };

    jetstream::stream::Config {
        name: descriptor.name.clone(),
        subjects: descriptor.subjects.clone(),
        retention,
        storage,
        max_age,
        max_messages: descriptor.max_messages,
        duplicate_window,
        ..Default::default()
    }
}

/// Build a durable, queue-grouped push consumer config
fn build_consumer_config(
    filter_subject: &str,
    opts: &SubscribeOptions,
    deliver_subject: String,
) -> jetstream::consumer::push::Config {
    jetstream::consumer::push::Config {
        deliver_subject,
        deliver_group: Some(opts.queue_group.clone()),
        durable_name: Some(opts.durable_name.clone()),
        filter_subject: filter_subject.to_string(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy: jetstream::consumer::DeliverPolicy::All,
        ack_wait: opts.ack_wait,
        max_deliver: if opts.max_deliver > 0 { opts.max_deliver } else { -1 },
        ..Default::default()
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref name) = config.client_name {
        opts = opts.name(name);
    }

    match (&config.user, &config.token) {
        (Some(user), _) => {
            opts = opts.user_and_password(
                user.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }
        (None, Some(token)) => {
            opts = opts.token(token.clone());
        }
        (None, None) => {}
    }

    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_mapping() {
        let descriptor = StreamDescriptor::new("student", vec!["student.*".to_string()])
            .with_max_age(Duration::from_secs(600_000))
            .with_storage(StorageType::Memory);
        let config = build_stream_config(&descriptor);
        assert_eq!(config.name, "student");
        assert_eq!(config.subjects, vec!["student.*"]);
        assert_eq!(config.retention, jetstream::stream::RetentionPolicy::Limits);
        assert_eq!(config.storage, jetstream::stream::StorageType::Memory);
        assert_eq!(config.max_age, Duration::from_secs(600_000));
        assert_eq!(config.max_messages, -1);
        assert_eq!(config.duplicate_window, Duration::from_secs(120));
    }

    #[test]
    fn test_duplicate_window_clamped_to_max_age() {
        let descriptor = StreamDescriptor::new("student", vec!["student.*".to_string()])
            .with_max_age(Duration::from_secs(60));
        let config = build_stream_config(&descriptor);
        assert_eq!(config.duplicate_window, Duration::from_secs(60));
    }

    #[test]
    fn test_consumer_config_mapping() {
        let opts = SubscribeOptions::new("queue-push", "durable-push")
            .with_max_deliver(2)
            .with_ack_wait(Duration::from_secs(1));
        let config = build_consumer_config("student.Created", &opts, "_INBOX.test".to_string());
        assert_eq!(config.deliver_subject, "_INBOX.test");
        assert_eq!(config.deliver_group.as_deref(), Some("queue-push"));
        assert_eq!(config.durable_name.as_deref(), Some("durable-push"));
        assert_eq!(config.filter_subject, "student.Created");
        assert_eq!(config.ack_policy, jetstream::consumer::AckPolicy::Explicit);
        assert_eq!(config.ack_wait, Duration::from_secs(1));
        assert_eq!(config.max_deliver, 2);
    }

    #[test]
    fn test_consumer_config_unlimited_deliveries() {
        let opts = SubscribeOptions::new("q", "d").with_max_deliver(0);
        let config = build_consumer_config("student.Created", &opts, "_INBOX.x".to_string());
        assert_eq!(config.max_deliver, -1);
    }
}
