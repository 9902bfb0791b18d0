pub mod consume;
pub mod publish;

use crate::config::AppConfig;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// student-stream - Durable student event delivery over NATS JetStream
#[derive(Debug, Parser)]
#[command(name = "student-stream", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// NATS server URL (overrides config and STUDENT_NATS_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// NATS user name
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// NATS password
    #[arg(long, global = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Provision the stream, publish students, then wait for a signal
    Publish {
        /// Number of students to publish (ids 1..=count)
        #[arg(long, default_value_t = 3)]
        count: i64,
    },

    /// Join the durable queue group and process students until a signal
    Consume,
}

impl Cli {
    /// Resolve configuration: file, then environment, then flags
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        config.apply_env();

        if let Some(url) = &self.url {
            config.nats.url = url.clone();
        }
        if let Some(user) = &self.user {
            config.nats.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.nats.password = Some(password.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_publish_with_globals() {
        let cli = Cli::parse_from([
            "student-stream",
            "--url",
            "nats://broker:4222",
            "publish",
            "--count",
            "5",
            "--user",
            "Bob",
        ]);
        assert!(matches!(cli.command, Commands::Publish { count: 5 }));

        let config = cli.resolve_config().unwrap();
        assert_eq!(config.nats.url, "nats://broker:4222");
        assert_eq!(config.nats.user.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_publish_count_default() {
        let cli = Cli::parse_from(["student-stream", "publish"]);
        assert!(matches!(cli.command, Commands::Publish { count: 3 }));
    }

    #[test]
    fn test_parse_consume() {
        let cli = Cli::parse_from(["student-stream", "consume"]);
        assert!(matches!(cli.command, Commands::Consume));
        assert!(cli.config.is_none());
    }
}
