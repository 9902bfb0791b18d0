//! Application configuration
//!
//! Defaults reproduce the `student` stream setup. A TOML file can override
//! any field; environment variables override the file for connection
//! credentials.

use crate::error::{EventError, Result};
use crate::provider::nats::NatsConfig;
use crate::types::{RetentionPolicy, StorageType, StreamDescriptor, SubscribeOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variables consulted by `AppConfig::apply_env`
pub const ENV_URL: &str = "STUDENT_NATS_URL";
pub const ENV_USER: &str = "STUDENT_NATS_USER";
pub const ENV_PASSWORD: &str = "STUDENT_NATS_PASSWORD";
pub const ENV_TOKEN: &str = "STUDENT_NATS_TOKEN";

/// Top-level configuration for the publisher and consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,

    pub stream: StreamDescriptor,

    /// Subject student events are published to and consumed from
    pub subject: String,

    pub consumer: ConsumerConfig,
}

/// Durable consumer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub queue_group: String,

    pub durable_name: String,

    /// Total delivery attempts per message
    pub max_deliver: i64,

    /// Ack deadline in milliseconds
    pub ack_wait_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue_group: "queue-push".to_string(),
            durable_name: "durable-push".to_string(),
            max_deliver: 2,
            ack_wait_ms: 1_000,
        }
    }
}

impl ConsumerConfig {
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions::new(self.queue_group.clone(), self.durable_name.clone())
            .with_max_deliver(self.max_deliver)
            .with_ack_wait(Duration::from_millis(self.ack_wait_ms))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            stream: StreamDescriptor {
                name: "student".to_string(),
                subjects: vec!["student.*".to_string()],
                retention: RetentionPolicy::Limits,
                max_age_secs: 10_000 * 60,
                storage: StorageType::File,
                max_messages: -1,
                duplicate_window_secs: 120,
            },
            subject: "student.Created".to_string(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, or defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            EventError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content).map_err(|e| {
            EventError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override connection settings from `STUDENT_NATS_*` variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_URL) {
            self.nats.url = url;
        }
        if let Some(user) = var(ENV_USER) {
            self.nats.user = Some(user);
        }
        if let Some(password) = var(ENV_PASSWORD) {
            self.nats.password = Some(password);
        }
        if let Some(token) = var(ENV_TOKEN) {
            self.nats.token = Some(token);
        }
    }

    /// Reject settings the broker would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.stream.name.is_empty() {
            return Err(EventError::Config("stream.name must not be empty".to_string()));
        }
        if self.stream.subjects.is_empty() {
            return Err(EventError::Config("stream.subjects must not be empty".to_string()));
        }
        if self.subject.is_empty() {
            return Err(EventError::Config("subject must not be empty".to_string()));
        }
        if !self
            .stream
            .subjects
            .iter()
            .any(|pattern| crate::provider::subject_matches(pattern, &self.subject))
        {
            return Err(EventError::Config(format!(
                "subject '{}' is not captured by stream '{}' ({:?})",
                self.subject, self.stream.name, self.stream.subjects
            )));
        }
        if self.consumer.ack_wait_ms == 0 {
            return Err(EventError::Config("consumer.ack_wait_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_student_setup() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4223");
        assert!(config.nats.user.is_none());
        assert!(config.nats.password.is_none());
        assert_eq!(config.stream.name, "student");
        assert_eq!(config.stream.duplicate_window_secs, 120);
        assert_eq!(config.stream.subjects, vec!["student.*"]);
        assert_eq!(config.stream.max_age(), Duration::from_secs(600_000));
        assert_eq!(config.subject, "student.Created");

        let opts = config.consumer.subscribe_options();
        assert_eq!(opts.queue_group, "queue-push");
        assert_eq!(opts.durable_name, "durable-push");
        assert_eq!(opts.max_deliver, 2);
        assert_eq!(opts.ack_wait, Duration::from_secs(1));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            subject = "student.Updated"

            [nats]
            url = "nats://broker:4222"
            user = "Bob"
            password = "123456"

            [consumer]
            max_deliver = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.subject, "student.Updated");
        assert_eq!(config.nats.url, "nats://broker:4222");
        assert_eq!(config.nats.user.as_deref(), Some("Bob"));
        assert_eq!(config.consumer.max_deliver, 5);
        assert_eq!(config.consumer.durable_name, "durable-push");
        assert_eq!(config.stream.name, "student");
    }

    #[test]
    fn test_stream_section_from_toml() {
        let config = AppConfig::from_toml(
            r#"
            [stream]
            name = "orders"
            subjects = ["orders.>"]
            retention = "workqueue"
            storage = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.retention, RetentionPolicy::WorkQueue);
        assert_eq!(config.stream.storage, StorageType::Memory);
        assert_eq!(config.stream.max_messages, -1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student-stream.toml");
        std::fs::write(&path, "subject = \"student.Deleted\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.subject, "student.Deleted");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/student-stream.toml"))).unwrap_err();
        assert!(matches!(err, EventError::Config(_)));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_URL, "nats://env:4222"),
            (ENV_USER, "Tom"),
            (ENV_PASSWORD, "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.nats.url, "nats://env:4222");
        assert_eq!(config.nats.user.as_deref(), Some("Tom"));
        assert_eq!(config.nats.password.as_deref(), Some("secret"));
        assert!(config.nats.token.is_none());
    }

    #[test]
    fn test_validate_rejects_uncaptured_subject() {
        let config = AppConfig {
            subject: "course.Created".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EventError::Config(_))));
    }
}
