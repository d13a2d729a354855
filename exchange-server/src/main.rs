use exchange_server::{serve, ServerConfig, ServerError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("exchange_server=info,warn")),
        )
        .with_target(true)
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "starting gift exchange server");
    serve(config).await
}
