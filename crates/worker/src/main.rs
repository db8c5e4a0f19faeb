use std::sync::Arc;

use redelay_common::config::AppConfig;
use redelay_worker::handler::LoggingHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    redelay_worker::init_tracing("redelay_worker=info,redelay_engine=info");

    tracing::info!("Redelay worker starting...");

    let config = AppConfig::from_env()?;
    let engine = redelay_worker::connect_engine(&config).await?;

    let handle = engine.subscribe(Arc::new(LoggingHandler)).await?;

    // Graceful shutdown on Ctrl+C
    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            token.cancel();
        }
    });

    if let Err(e) = handle.wait().await {
        tracing::error!(error = %e, "Notification subscription exited with error");
        return Err(e.into());
    }

    tracing::info!("Redelay worker stopped.");
    Ok(())
}
