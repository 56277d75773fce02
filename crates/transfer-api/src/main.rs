use transfer_api::setup;
use transfer_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Database, storage, services and routes
    let (state, router) = setup::initialize_app(config.clone()).await?;

    // Job workers and lifecycle sweeps run until the server stops
    let background = setup::services::start_background(&state);

    setup::server::start_server(&config, router).await?;

    background.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
