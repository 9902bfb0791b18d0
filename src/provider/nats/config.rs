//! NATS connection configuration

use serde::{Deserialize, Serialize};

/// Connection settings for a NATS server with JetStream enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL (e.g., "nats://localhost:4223")
    pub url: String,

    /// Username for user/password authentication
    pub user: Option<String>,

    /// Password for user/password authentication
    pub password: Option<String>,

    /// Token authentication (used when no user is set)
    pub token: Option<String>,

    /// Connection name reported to the server
    pub client_name: Option<String>,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,
}

/// Anonymous connection to the local server; credentials are opt-in
impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4223".to_string(),
            user: None,
            password: None,
            token: None,
            client_name: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl NatsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Display for NatsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.user {
            Some(ref user) => write!(f, "{} (user {})", self.url, user),
            None => f.write_str(&self.url),
        }
    }
}
