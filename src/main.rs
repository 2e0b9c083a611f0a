//! CLI entry point running a synthetic live session through the timeshift layer.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = timeshift::config::CliArgs::parse();
    let config = timeshift::config::AppConfig::load(cli).await?;

    let report = match timeshift::run(config).await {
        Ok(report) => report,
        Err(error) => {
            tracing::error!(error = %error, "session failed");
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    };

    tracing::info!(
        forwarded = report.blocks_forwarded,
        sent = report.blocks_sent,
        max_lag_ms = report.max_lag_ms,
        underflows = report.stats.underflows,
        "timeshift session finished"
    );
    Ok(())
}
