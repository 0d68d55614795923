//! fetchqueue - multi-tenant URL fetch catalog and fairness-aware download scheduler.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetchqueue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    fetchqueue::cli::run().await
}
