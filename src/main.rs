use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use student_stream::cli::{Cli, Commands};
use student_stream::provider::Broker;
use student_stream::NatsBroker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    tracing::info!(nats = %config.nats, stream = %config.stream.name, "Connecting");
    let broker: Arc<dyn Broker> = Arc::new(NatsBroker::connect(config.nats.clone()).await?);

    match cli.command {
        Commands::Publish { count } => {
            student_stream::cli::publish::execute(broker, &config, count).await?;
        }
        Commands::Consume => {
            student_stream::cli::consume::execute(broker, &config).await?;
        }
    }

    Ok(())
}
