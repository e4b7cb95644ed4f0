//! Outpost Node binary
//!
//! One fleet node, configured from `OUTPOST_*` environment variables.

use outpost_node::config::DEFAULT_LOG_FILTER;
use outpost_node::{NodeConfig, OutpostNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Outpost Node");

    let config = NodeConfig::from_env()?;

    let node = OutpostNode::new(config);
    node.run().await?;

    Ok(())
}
