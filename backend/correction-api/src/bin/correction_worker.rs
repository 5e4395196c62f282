use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::fmt::init;

use prologin_correction::{
    config::Config,
    services::{
        correction_worker::CorrectionWorker, corrector_client::CorrectorClient,
        dispatcher::CorrectionDispatcher, AppState,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;
    if config.correctors.endpoints.is_empty() {
        anyhow::bail!("no corrector endpoint configured (correctors.endpoints)");
    }

    let app_state = AppState::connect(config.clone())
        .await
        .context("Failed to initialize app state")?;

    let corrector = CorrectorClient::new(
        Duration::from_secs(config.correctors.request_timeout_secs),
        config.correctors.compile.clone(),
    )
    .context("Failed to build corrector HTTP client")?;

    let dispatcher = CorrectionDispatcher::from_config(
        &config,
        app_state.store.clone(),
        app_state.problems.clone(),
        Arc::new(corrector),
    );

    let worker = Arc::new(CorrectionWorker::new(
        Arc::new(dispatcher),
        app_state.queue.clone(),
        config.queue.clone(),
        config.worker.clone(),
    ));

    worker.run().await?;

    Ok(())
}
